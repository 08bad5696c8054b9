use serde_json::{json, Value};
use std::sync::LazyLock;

pub static CONFIG_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["name", "steps"],
        "properties": {
            "name": { "type": "string", "minLength": 1 },
            "concurrency": { "type": "integer", "minimum": 1 },
            "max_retries": { "type": "integer", "minimum": 0 },
            "retry_delay_seconds": { "type": "number", "minimum": 0 },
            "timeout_seconds": { "type": "integer", "minimum": 1 },
            "cache": {
                "type": "object",
                "properties": {
                    "enabled": { "type": "boolean" },
                    "expiration": { "type": "string", "pattern": "^\\s*\\d+\\s*[smhdw]?\\s*$" }
                }
            },
            "sandbox": {
                "type": "object",
                "properties": {
                    "base_path": { "type": "string" },
                    "max_size_mb": { "type": "integer", "minimum": 0 },
                    "timeout_seconds": { "type": "integer", "minimum": 1 },
                    "auto_cleanup": { "type": "boolean" }
                }
            },
            "continue_when": { "$ref": "#/$defs/condition" },
            "security": {
                "type": "object",
                "properties": {
                    "sandbox": {
                        "type": "object",
                        "properties": {
                            "enabled": { "type": "boolean" },
                            "autoAllowBashIfSandboxed": { "type": "boolean" }
                        }
                    },
                    "permissions": {
                        "type": "object",
                        "properties": {
                            "defaultMode": { "type": "string" },
                            "allow": { "type": "array", "items": { "type": "string" } }
                        }
                    }
                }
            },
            "skills": {
                "type": "object",
                "additionalProperties": { "type": "string" }
            },
            "steps": {
                "type": "array",
                "minItems": 1,
                "items": { "$ref": "#/$defs/step" }
            }
        },
        "$defs": {
            "step": {
                "type": "object",
                "required": ["name"],
                "properties": {
                    "name": { "type": "string", "minLength": 1 },
                    "description": { "type": "string" },
                    "command": { "type": "string" },
                    "tool": { "type": "string" },
                    "env": { "type": "object", "additionalProperties": { "type": "string" } },
                    "config": { "type": "object" },
                    "timeout_seconds": { "type": "integer", "minimum": 1 },
                    "max_retries": { "type": "integer", "minimum": 0 },
                    "retry_delay_seconds": { "type": "number", "minimum": 0 }
                }
            },
            "condition": {
                "type": "object",
                "required": ["kind"],
                "properties": {
                    "kind": {
                        "type": "string",
                        "enum": ["always", "stop-on-failure", "stop-on-success", "threshold", "all", "any"]
                    },
                    "metric": { "type": "string" },
                    "cmp": { "type": "string", "enum": ["gt", "ge", "lt", "le", "eq"] },
                    "value": { "type": "number" },
                    "missing": { "type": "number" },
                    "conditions": { "type": "array", "items": { "$ref": "#/$defs/condition" } }
                }
            }
        }
    })
});
