//! Secret configuration values

use schemars::JsonSchema;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::connection::redact_url;

const MASK: &str = "***";

/// A connection URL or password read from configuration.
///
/// Never shows up in `Debug` output or serialized config. Drivers get the
/// value through [`to_secret`](Self::to_secret); logs use
/// [`redacted`](Self::redacted).
#[derive(Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    /// Wrap a value
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into().into_boxed_str()))
    }

    /// The wrapped value
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    /// Whether the value is empty or whitespace only
    pub fn is_blank(&self) -> bool {
        self.expose_secret().trim().is_empty()
    }

    /// The value as a `SecretString` for handing to a driver
    pub fn to_secret(&self) -> SecretString {
        self.0.clone()
    }

    /// Loggable form: a URL with its password masked, or a fixed mask
    pub fn redacted(&self) -> String {
        redact_url(self.expose_secret())
    }
}

impl std::fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(MASK)
    }
}

impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(MASK)
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

impl JsonSchema for SensitiveString {
    fn schema_name() -> String {
        "SensitiveString".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        let mut schema = gen.subschema_for::<String>();
        if let schemars::schema::Schema::Object(obj) = &mut schema {
            obj.format = Some("password".to_string());
            obj.metadata().write_only = true;
        }
        schema
    }
}
