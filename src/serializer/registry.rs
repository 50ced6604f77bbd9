use super::{Record, TYPE_FIELD};
use crate::error::{DrftError, Result};
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Per-field decode-time hook: given a field's raw JSON value, return the
/// value that should actually be decoded. Used to turn a `dependencies`
/// id list into live resource references (§4.D/§4.E), or to intercept any
/// other field before its declared type is reconstructed.
pub type FieldMapper<'a> = dyn Fn(&str, &Value) -> Result<Value> + 'a;

type DecodeFn = Box<
    dyn Fn(&Map<String, Value>, &TypeRegistry, Option<&FieldMapper>) -> Result<Arc<dyn Record>>
        + Send
        + Sync,
>;

struct CustomCodec {
    encode: Box<dyn Fn(&dyn Any) -> Result<Value> + Send + Sync>,
    decode: Box<dyn Fn(&Value) -> Result<Box<dyn Any + Send + Sync>> + Send + Sync>,
}

/// The type registry: the statically-typed stand-in for runtime reflection.
/// Record types register a decoder once; custom codecs cover opaque leaf
/// types (e.g. URLs) that don't decompose into fields at all.
#[derive(Default)]
pub struct TypeRegistry {
    decoders: HashMap<String, DecodeFn>,
    custom_codecs: HashMap<TypeId, CustomCodec>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record type's decoder under `tag`. The closure receives
    /// the object's fields (with `.type` stripped), the registry itself
    /// (for decoding nested records), and an optional field mapper.
    pub fn register<T, F>(&mut self, tag: &'static str, decode: F)
    where
        T: Record + 'static,
        F: Fn(&Map<String, Value>, &TypeRegistry, Option<&FieldMapper>) -> Result<T>
            + Send
            + Sync
            + 'static,
    {
        self.decoders.insert(
            tag.to_string(),
            Box::new(move |fields, reg, mapper| {
                decode(fields, reg, mapper).map(|v| Arc::new(v) as Arc<dyn Record>)
            }),
        );
    }

    /// Register a custom codec for an opaque leaf type `T` that has no
    /// field decomposition (e.g. a URL newtype). Applies to instances of
    /// `T` wherever encountered, including through trait-object erasure
    /// when the caller knows to ask for `T` specifically.
    pub fn register_codec<T, E, D>(&mut self, encode: E, decode: D)
    where
        T: Any + Send + Sync,
        E: Fn(&T) -> Result<Value> + Send + Sync + 'static,
        D: Fn(&Value) -> Result<T> + Send + Sync + 'static,
    {
        self.custom_codecs.insert(
            TypeId::of::<T>(),
            CustomCodec {
                encode: Box::new(move |any| {
                    let v = any
                        .downcast_ref::<T>()
                        .ok_or_else(|| DrftError::Validation("codec type mismatch on encode".into()))?;
                    encode(v)
                }),
                decode: Box::new(move |value| {
                    decode(value).map(|v| Box::new(v) as Box<dyn Any + Send + Sync>)
                }),
            },
        );
    }

    pub fn encode_value<T: Any + Send + Sync>(&self, value: &T) -> Result<Value> {
        let codec = self
            .custom_codecs
            .get(&TypeId::of::<T>())
            .ok_or_else(|| DrftError::Validation("no codec registered for type".into()))?;
        (codec.encode)(value)
    }

    pub fn decode_value<T: Any + Send + Sync + Clone>(&self, value: &Value) -> Result<T> {
        let codec = self
            .custom_codecs
            .get(&TypeId::of::<T>())
            .ok_or_else(|| DrftError::Validation("no codec registered for type".into()))?;
        let boxed = (codec.decode)(value)?;
        boxed
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| DrftError::Validation("codec type mismatch on decode".into()))
    }

    /// Encode a record graph with a fresh cycle guard.
    pub fn encode(&self, record: &Arc<dyn Record>) -> Result<Value> {
        let mut guard = HashSet::new();
        self.encode_guarded(record, &mut guard)
    }

    /// Encode a nested record, sharing the caller's cycle guard. Call this
    /// from inside a `Record::encode_fields` implementation when a field
    /// itself holds another record.
    pub fn encode_nested(&self, record: &Arc<dyn Record>, guard: &mut HashSet<usize>) -> Result<Value> {
        self.encode_guarded(record, guard)
    }

    fn encode_guarded(&self, record: &Arc<dyn Record>, guard: &mut HashSet<usize>) -> Result<Value> {
        let ptr = Arc::as_ptr(record) as *const () as usize;
        if !guard.insert(ptr) {
            return Err(DrftError::Validation(
                "cycle detected while encoding record graph".into(),
            ));
        }
        let mut fields = record.encode_fields()?;
        fields.insert(TYPE_FIELD.to_string(), Value::String(record.type_tag().to_string()));
        guard.remove(&ptr);
        Ok(Value::Object(fields))
    }

    /// Decode a value by locating its `.type` tag and dispatching to the
    /// registered decoder. Returns a `Validation` error naming the field
    /// for every failure mode in §4.A: missing tag, unresolvable tag, or a
    /// field the decoder itself rejects.
    pub fn decode(&self, value: &Value, mapper: Option<&FieldMapper>) -> Result<Arc<dyn Record>> {
        let obj = value
            .as_object()
            .ok_or_else(|| DrftError::Validation("expected a JSON object, got a scalar".into()))?;
        let tag = obj
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| DrftError::Validation(format!("missing required field '{TYPE_FIELD}'")))?;
        let decoder = self.decoders.get(tag).ok_or_else(|| {
            DrftError::Validation(format!("unresolvable type tag '{tag}'"))
        })?;
        decoder(obj, self, mapper)
    }

    /// Whether a tag is known. Used by the resource-state decoder to
    /// decide whether to fall back to the base `ResourceState` shape
    /// (§4.A "Fallback").
    pub fn knows_tag(&self, tag: &str) -> bool {
        self.decoders.contains_key(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Leaf {
        value: String,
    }

    impl Record for Leaf {
        fn type_tag(&self) -> &'static str {
            "test.Leaf"
        }
        fn encode_fields(&self) -> Result<Map<String, Value>> {
            let mut m = Map::new();
            m.insert("value".to_string(), json!(self.value));
            Ok(m)
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn registry() -> TypeRegistry {
        let mut r = TypeRegistry::new();
        r.register::<Leaf, _>("test.Leaf", |fields, _reg, _mapper| {
            let value = fields
                .get("value")
                .and_then(Value::as_str)
                .ok_or_else(|| DrftError::Validation("field 'value' missing".into()))?
                .to_string();
            Ok(Leaf { value })
        });
        r
    }

    #[test]
    fn round_trip_through_the_registry() {
        let reg = registry();
        let record: Arc<dyn Record> = Arc::new(Leaf { value: "x".into() });
        let encoded = reg.encode(&record).unwrap();
        let decoded = reg.decode(&encoded, None).unwrap();
        assert_eq!(decoded.type_tag(), "test.Leaf");
    }

    #[test]
    fn missing_type_tag_is_a_validation_error() {
        let reg = registry();
        let err = reg.decode(&json!({"value": "x"}), None).unwrap_err();
        assert!(err.to_string().contains(".type"));
    }

    #[test]
    fn unresolvable_type_tag_is_a_validation_error() {
        let reg = registry();
        let err = reg
            .decode(&json!({".type": "test.Unknown", "value": "x"}), None)
            .unwrap_err();
        assert!(err.to_string().contains("test.Unknown"));
    }

}
