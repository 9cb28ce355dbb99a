//! The string-or-binary envelope used to move bodies across the RPC
//! boundary.

use base64::{engine::general_purpose::STANDARD, Engine};
use boa_engine::{
    object::builtins::JsArrayBuffer, Context, JsError, JsNativeError, JsResult, JsValue,
};
use exthost_api::blob::{buffer_source_bytes, Blob};
use exthost_core::native::JsNativeObject;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "text")]
    Text { content: String },
    /// `content` is base64.
    #[serde(rename = "blob")]
    Blob {
        #[serde(rename = "mimeType")]
        mime_type: String,
        content: String,
    },
    /// `content` is base64.
    #[serde(rename = "array buffer")]
    ArrayBuffer { content: String },
}

/// The decoded payload of an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Blob(Blob),
    Buffer(Vec<u8>),
}

fn invalid_type() -> JsError {
    JsNativeError::typ().with_message("Invalid type").into()
}

impl Envelope {
    pub fn text(content: impl Into<String>) -> Self {
        Envelope::Text {
            content: content.into(),
        }
    }

    pub fn blob(blob: &Blob) -> Self {
        Envelope::Blob {
            mime_type: blob.type_().to_string(),
            content: STANDARD.encode(blob.bytes()),
        }
    }

    pub fn buffer(bytes: &[u8]) -> Self {
        Envelope::ArrayBuffer {
            content: STANDARD.encode(bytes),
        }
    }

    /// Encodes a string, a `Blob` or an `ArrayBuffer` (or view).
    pub fn from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        if let Some(text) = value.as_string() {
            return Ok(Envelope::text(text.to_std_string_escaped()));
        }
        if let Ok(blob) = JsNativeObject::<Blob>::try_from(value.clone()) {
            return Ok(Envelope::blob(&blob.deref()));
        }
        match value.as_object() {
            Some(object) => match buffer_source_bytes(object, context)? {
                Some(bytes) => Ok(Envelope::buffer(&bytes)),
                None => Err(invalid_type()),
            },
            None => Err(invalid_type()),
        }
    }

    /// Reads an envelope out of an RPC result.
    pub fn from_json(value: &serde_json::Value) -> JsResult<Self> {
        serde_json::from_value(value.clone()).map_err(|_| invalid_type())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn decode(&self) -> JsResult<Payload> {
        let bytes = |content: &str| {
            STANDARD.decode(content).map_err(|err| {
                JsError::from(JsNativeError::typ().with_message(format!("Invalid base64: {err}")))
            })
        };
        Ok(match self {
            Envelope::Text { content } => Payload::Text(content.clone()),
            Envelope::Blob { mime_type, content } => {
                Payload::Blob(Blob::from_bytes(bytes(content)?, mime_type))
            }
            Envelope::ArrayBuffer { content } => Payload::Buffer(bytes(content)?),
        })
    }
}

impl Payload {
    /// The payload as a body: text becomes UTF-8, buffers lose their type.
    pub fn into_blob(self) -> Blob {
        match self {
            Payload::Text(text) => Blob::from_bytes(text.into_bytes(), "text/plain;charset=utf-8"),
            Payload::Blob(blob) => blob,
            Payload::Buffer(bytes) => Blob::from_bytes(bytes, ""),
        }
    }

    pub fn into_js(self, context: &mut Context) -> JsResult<JsValue> {
        match self {
            Payload::Text(text) => Ok(boa_engine::JsString::from(text).into()),
            Payload::Blob(blob) => Ok(blob.into_object(context)?.to_inner()),
            Payload::Buffer(bytes) => Ok(JsArrayBuffer::from_byte_block(bytes, context)?.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn blobs_survive_the_trip() {
        let blob = Blob::from_bytes(vec![0, 159, 146, 150, 255], "image/png");

        let wire = Envelope::blob(&blob).to_json();
        let decoded = Envelope::from_json(&wire).unwrap().decode().unwrap();

        assert_eq!(wire["type"], "blob");
        assert_eq!(wire["mimeType"], "image/png");
        assert_eq!(decoded, Payload::Blob(blob));
    }

    #[test]
    fn reads_host_envelopes() {
        let text = json!({ "type": "text", "content": "hi", "mimeType": "" });
        let buffer = json!({ "type": "array buffer", "content": "AQID" });

        assert_eq!(
            Envelope::from_json(&text).unwrap().decode().unwrap(),
            Payload::Text("hi".to_string())
        );
        assert_eq!(
            Envelope::from_json(&buffer).unwrap().decode().unwrap(),
            Payload::Buffer(vec![1, 2, 3])
        );
    }

    #[test]
    fn rejects_unknown_types() {
        let error = Envelope::from_json(&json!({ "type": "stream" })).unwrap_err();

        assert_eq!(error.to_string(), "TypeError: Invalid type");
        let context = &mut Context::default();
        assert!(Envelope::from_js(&JsValue::from(1), context).is_err());
    }
}
