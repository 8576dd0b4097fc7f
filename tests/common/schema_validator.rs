//! JSON schema checks for federation documents

use jsonschema::{Draft, JSONSchema};
use serde_json::{Value, json};

fn compile(schema: Value) -> JSONSchema {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .expect("Failed to compile schema")
}

/// Validate a JSON value against a schema
pub fn validate_against_schema(data: &Value, schema: &JSONSchema) -> Result<(), Vec<String>> {
    match schema.validate(data) {
        Ok(_) => Ok(()),
        Err(errors) => {
            let error_messages: Vec<String> = errors
                .map(|e| format!("{} at {}", e, e.instance_path))
                .collect();
            Err(error_messages)
        }
    }
}

fn public_key() -> Value {
    json!({
        "type": "object",
        "required": ["id", "owner", "publicKeyPem"],
        "properties": {
            "id": {"type": "string"},
            "owner": {"type": "string"},
            "publicKeyPem": {"type": "string"}
        }
    })
}

/// Person actor document
pub fn person_schema() -> JSONSchema {
    compile(json!({
        "type": "object",
        "required": ["@context", "type", "id", "inbox", "outbox", "publicKey"],
        "properties": {
            "@context": {"type": "array"},
            "type": {"const": "Person"},
            "id": {"type": "string", "format": "uri"},
            "name": {"type": "string"},
            "inbox": {"type": "string"},
            "outbox": {"type": "string"},
            "followers": {"type": "string"},
            "following": {"type": "string"},
            "icon": {"type": "array"},
            "publicKey": public_key()
        }
    }))
}

/// Note object
pub fn note_schema() -> JSONSchema {
    compile(json!({
        "type": "object",
        "required": ["type", "id", "content", "attributedTo", "to"],
        "properties": {
            "type": {"const": "Note"},
            "id": {"type": "string"},
            "content": {"type": "string"},
            "published": {"type": "string"},
            "attributedTo": {"type": "string"},
            "to": {"type": "string"},
            "tag": {"type": "array", "items": {"type": "string"}}
        }
    }))
}

/// NodeInfo 2.0 document
pub fn nodeinfo_schema() -> JSONSchema {
    compile(json!({
        "type": "object",
        "required": ["version", "software", "protocols", "usage", "openRegistrations"],
        "properties": {
            "version": {"const": "2.0"},
            "software": {
                "type": "object",
                "required": ["name", "version"]
            },
            "protocols": {
                "type": "array",
                "contains": {"const": "activitypub"}
            },
            "usage": {
                "type": "object",
                "required": ["users", "localPosts"],
                "properties": {
                    "users": {
                        "type": "object",
                        "required": ["total"],
                        "properties": {"total": {"type": "integer", "minimum": 0}}
                    },
                    "localPosts": {"type": "integer", "minimum": 0}
                }
            },
            "openRegistrations": {"type": "boolean"}
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_schema_requires_public_key() {
        let schema = person_schema();
        let person = json!({
            "@context": ["https://www.w3.org/ns/activitystreams"],
            "type": "Person",
            "id": "https://chat.example.com/federation/users/1",
            "inbox": "https://chat.example.com/federation/users/1/inbox",
            "outbox": "https://chat.example.com/federation/users/1/outbox"
        });

        assert!(validate_against_schema(&person, &schema).is_err());
    }
}
