//! Minimal hand-built OpenAPI document and Swagger UI page. rivetr has
//! no OpenAPI surface of its own to crib from; this is the smallest
//! idiomatic way to satisfy `/openapi.json` + `/api-docs` without
//! pulling in a templating or codegen dependency.

use serde_json::json;

pub fn document() -> serde_json::Value {
    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Preview Environment Orchestrator",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "paths": {
            "/health": {
                "get": {
                    "summary": "Liveness and uptime",
                    "responses": { "200": { "description": "OK" } }
                }
            },
            "/webhook/github": {
                "post": {
                    "summary": "GitHub pull_request webhook sink",
                    "responses": {
                        "200": { "description": "Handled" },
                        "401": { "description": "Invalid signature" },
                        "500": { "description": "Handler failure" }
                    }
                }
            },
            "/api/previews": {
                "get": {
                    "summary": "List all tracked deployments",
                    "responses": { "200": { "description": "OK" } }
                }
            },
            "/api/previews/{deploymentId}": {
                "delete": {
                    "summary": "Manually clean up a deployment",
                    "parameters": [{
                        "name": "deploymentId",
                        "in": "path",
                        "required": true,
                        "schema": { "type": "string" }
                    }],
                    "responses": {
                        "200": { "description": "Deleted" },
                        "400": { "description": "Missing id" },
                        "404": { "description": "Unknown id" }
                    }
                }
            }
        },
        "components": {
            "schemas": {
                "Deployment": {
                    "type": "object",
                    "properties": {
                        "prNumber": { "type": "integer" },
                        "repoOwner": { "type": "string" },
                        "repoName": { "type": "string" },
                        "projectSlug": { "type": "string" },
                        "deploymentId": { "type": "string" },
                        "branch": { "type": "string" },
                        "commitSha": { "type": "string" },
                        "status": { "type": "string", "enum": ["building", "running", "failed", "stopped"] },
                        "url": { "type": "string", "nullable": true }
                    }
                }
            }
        }
    })
}

pub const SWAGGER_HTML: &str = r##"<!DOCTYPE html>
<html>
<head>
<title>Preview Orchestrator API Docs</title>
<link rel="stylesheet" href="https://cdn.jsdelivr.net/npm/swagger-ui-dist/swagger-ui.css" />
</head>
<body>
<div id="swagger-ui"></div>
<script src="https://cdn.jsdelivr.net/npm/swagger-ui-dist/swagger-ui-bundle.js"></script>
<script>
window.onload = () => {
  window.ui = SwaggerUIBundle({ url: "/openapi.json", dom_id: "#swagger-ui" });
};
</script>
</body>
</html>"##;
