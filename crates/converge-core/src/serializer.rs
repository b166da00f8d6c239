//! JSON serialization of typed objects
//!
//! A plain `serde_json` encoding writes a zero [`MetaTime`] as `null`. The API
//! server omits such fields entirely, so a `null` shows up as a spurious
//! difference on every apply. [`Serializer`] wraps the target serde serializer
//! and probes each struct field before it is written: fields whose newtype is
//! registered as "omit when empty" and whose content is empty are skipped.
//! Everything else is encoded exactly as serde would encode it.

use serde::ser::{
    self, Impossible, Serialize, SerializeMap, SerializeSeq, SerializeStruct,
    SerializeStructVariant, SerializeTuple, SerializeTupleStruct, SerializeTupleVariant,
};
use serde_json::Value;

use crate::error::Result;
use crate::scheme::Scheme;
use crate::time::MetaTime;

/// Serializer with per-newtype empty-value omission
#[derive(Debug, Clone)]
pub struct Serializer {
    omit_empty: Vec<&'static str>,
}

impl Default for Serializer {
    fn default() -> Self {
        Self {
            omit_empty: vec![MetaTime::NEWTYPE_NAME],
        }
    }
}

impl Serializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also omit empty values of the newtype struct named `newtype_name`
    pub fn omit_empty(mut self, newtype_name: &'static str) -> Self {
        if !self.omit_empty.contains(&newtype_name) {
            self.omit_empty.push(newtype_name);
        }
        self
    }

    /// Encode into a JSON value, applying the omission rule
    pub fn to_value<T: Serialize + ?Sized>(&self, object: &T) -> Result<Value> {
        let value = object.serialize(Intercept {
            inner: serde_json::value::Serializer,
            hooks: &self.omit_empty,
        })?;
        Ok(value)
    }

    /// Encode a typed object to JSON bytes, stamping apiVersion/kind from the scheme
    pub fn serialize<T: Serialize + 'static>(&self, object: &T, scheme: &Scheme) -> Result<Vec<u8>> {
        let mut value = self.to_value(object)?;
        scheme.set_type_meta::<T>(&mut value)?;
        Ok(serde_json::to_vec(&value)?)
    }
}

/// Serialize with the default omission rules
pub fn serialize<T: Serialize + 'static>(object: &T, scheme: &Scheme) -> Result<Vec<u8>> {
    Serializer::default().serialize(object, scheme)
}

fn is_omitted<T: Serialize + ?Sized>(value: &T, hooks: &[&'static str]) -> bool {
    value
        .serialize(Probe {
            mode: ProbeMode::Field(hooks),
        })
        .unwrap_or(false)
}

/// Re-enters the intercepting serializer for nested values
struct Wrap<'a, T: ?Sized> {
    value: &'a T,
    hooks: &'a [&'static str],
}

impl<T: Serialize + ?Sized> Serialize for Wrap<'_, T> {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.value.serialize(Intercept {
            inner: serializer,
            hooks: self.hooks,
        })
    }
}

struct Intercept<'a, S> {
    inner: S,
    hooks: &'a [&'static str],
}

struct Compound<'a, C> {
    inner: C,
    hooks: &'a [&'static str],
}

impl<'a, C> Compound<'a, C> {
    fn wrap<'v, T: ?Sized>(&self, value: &'v T) -> Wrap<'v, T>
    where
        'a: 'v,
    {
        Wrap {
            value,
            hooks: self.hooks,
        }
    }
}

macro_rules! forward {
    ($($method:ident($ty:ty)),* $(,)?) => {
        $(
            fn $method(self, v: $ty) -> std::result::Result<Self::Ok, Self::Error> {
                self.inner.$method(v)
            }
        )*
    };
}

impl<'a, S: ser::Serializer> ser::Serializer for Intercept<'a, S> {
    type Ok = S::Ok;
    type Error = S::Error;
    type SerializeSeq = Compound<'a, S::SerializeSeq>;
    type SerializeTuple = Compound<'a, S::SerializeTuple>;
    type SerializeTupleStruct = Compound<'a, S::SerializeTupleStruct>;
    type SerializeTupleVariant = Compound<'a, S::SerializeTupleVariant>;
    type SerializeMap = Compound<'a, S::SerializeMap>;
    type SerializeStruct = Compound<'a, S::SerializeStruct>;
    type SerializeStructVariant = Compound<'a, S::SerializeStructVariant>;

    forward! {
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_i128(i128),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_u128(u128),
        serialize_f32(f32),
        serialize_f64(f64),
        serialize_char(char),
        serialize_str(&str),
        serialize_bytes(&[u8]),
        serialize_unit_struct(&'static str),
    }

    fn serialize_none(self) -> std::result::Result<Self::Ok, Self::Error> {
        self.inner.serialize_none()
    }

    fn serialize_some<T: Serialize + ?Sized>(
        self,
        value: &T,
    ) -> std::result::Result<Self::Ok, Self::Error> {
        self.inner.serialize_some(&Wrap {
            value,
            hooks: self.hooks,
        })
    }

    fn serialize_unit(self) -> std::result::Result<Self::Ok, Self::Error> {
        self.inner.serialize_unit()
    }

    fn serialize_unit_variant(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
    ) -> std::result::Result<Self::Ok, Self::Error> {
        self.inner.serialize_unit_variant(name, index, variant)
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        value: &T,
    ) -> std::result::Result<Self::Ok, Self::Error> {
        self.inner.serialize_newtype_struct(
            name,
            &Wrap {
                value,
                hooks: self.hooks,
            },
        )
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
        value: &T,
    ) -> std::result::Result<Self::Ok, Self::Error> {
        self.inner.serialize_newtype_variant(
            name,
            index,
            variant,
            &Wrap {
                value,
                hooks: self.hooks,
            },
        )
    }

    fn serialize_seq(self, len: Option<usize>) -> std::result::Result<Self::SerializeSeq, Self::Error> {
        Ok(Compound {
            inner: self.inner.serialize_seq(len)?,
            hooks: self.hooks,
        })
    }

    fn serialize_tuple(self, len: usize) -> std::result::Result<Self::SerializeTuple, Self::Error> {
        Ok(Compound {
            inner: self.inner.serialize_tuple(len)?,
            hooks: self.hooks,
        })
    }

    fn serialize_tuple_struct(
        self,
        name: &'static str,
        len: usize,
    ) -> std::result::Result<Self::SerializeTupleStruct, Self::Error> {
        Ok(Compound {
            inner: self.inner.serialize_tuple_struct(name, len)?,
            hooks: self.hooks,
        })
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
        len: usize,
    ) -> std::result::Result<Self::SerializeTupleVariant, Self::Error> {
        Ok(Compound {
            inner: self.inner.serialize_tuple_variant(name, index, variant, len)?,
            hooks: self.hooks,
        })
    }

    fn serialize_map(self, len: Option<usize>) -> std::result::Result<Self::SerializeMap, Self::Error> {
        Ok(Compound {
            inner: self.inner.serialize_map(len)?,
            hooks: self.hooks,
        })
    }

    fn serialize_struct(
        self,
        name: &'static str,
        len: usize,
    ) -> std::result::Result<Self::SerializeStruct, Self::Error> {
        Ok(Compound {
            inner: self.inner.serialize_struct(name, len)?,
            hooks: self.hooks,
        })
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
        len: usize,
    ) -> std::result::Result<Self::SerializeStructVariant, Self::Error> {
        Ok(Compound {
            inner: self.inner.serialize_struct_variant(name, index, variant, len)?,
            hooks: self.hooks,
        })
    }

    fn is_human_readable(&self) -> bool {
        self.inner.is_human_readable()
    }
}

impl<C: SerializeSeq> SerializeSeq for Compound<'_, C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> std::result::Result<(), Self::Error> {
        let wrapped = self.wrap(value);
        self.inner.serialize_element(&wrapped)
    }

    fn end(self) -> std::result::Result<Self::Ok, Self::Error> {
        self.inner.end()
    }
}

impl<C: SerializeTuple> SerializeTuple for Compound<'_, C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> std::result::Result<(), Self::Error> {
        let wrapped = self.wrap(value);
        self.inner.serialize_element(&wrapped)
    }

    fn end(self) -> std::result::Result<Self::Ok, Self::Error> {
        self.inner.end()
    }
}

impl<C: SerializeTupleStruct> SerializeTupleStruct for Compound<'_, C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> std::result::Result<(), Self::Error> {
        let wrapped = self.wrap(value);
        self.inner.serialize_field(&wrapped)
    }

    fn end(self) -> std::result::Result<Self::Ok, Self::Error> {
        self.inner.end()
    }
}

impl<C: SerializeTupleVariant> SerializeTupleVariant for Compound<'_, C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> std::result::Result<(), Self::Error> {
        let wrapped = self.wrap(value);
        self.inner.serialize_field(&wrapped)
    }

    fn end(self) -> std::result::Result<Self::Ok, Self::Error> {
        self.inner.end()
    }
}

impl<C: SerializeMap> SerializeMap for Compound<'_, C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> std::result::Result<(), Self::Error> {
        let wrapped = self.wrap(key);
        self.inner.serialize_key(&wrapped)
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> std::result::Result<(), Self::Error> {
        let wrapped = self.wrap(value);
        self.inner.serialize_value(&wrapped)
    }

    fn end(self) -> std::result::Result<Self::Ok, Self::Error> {
        self.inner.end()
    }
}

impl<C: SerializeStruct> SerializeStruct for Compound<'_, C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> std::result::Result<(), Self::Error> {
        if is_omitted(value, self.hooks) {
            return self.inner.skip_field(key);
        }
        let wrapped = self.wrap(value);
        self.inner.serialize_field(key, &wrapped)
    }

    fn skip_field(&mut self, key: &'static str) -> std::result::Result<(), Self::Error> {
        self.inner.skip_field(key)
    }

    fn end(self) -> std::result::Result<Self::Ok, Self::Error> {
        self.inner.end()
    }
}

impl<C: SerializeStructVariant> SerializeStructVariant for Compound<'_, C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> std::result::Result<(), Self::Error> {
        if is_omitted(value, self.hooks) {
            return self.inner.skip_field(key);
        }
        let wrapped = self.wrap(value);
        self.inner.serialize_field(key, &wrapped)
    }

    fn skip_field(&mut self, key: &'static str) -> std::result::Result<(), Self::Error> {
        self.inner.skip_field(key)
    }

    fn end(self) -> std::result::Result<Self::Ok, Self::Error> {
        self.inner.end()
    }
}

/// Short-circuit error for the probe; any compound value is "not empty"
#[derive(Debug)]
struct NotProbed;

impl std::fmt::Display for NotProbed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("value is not an omittable newtype")
    }
}

impl std::error::Error for NotProbed {}

impl ser::Error for NotProbed {
    fn custom<T: std::fmt::Display>(_msg: T) -> Self {
        NotProbed
    }
}

#[derive(Clone, Copy)]
enum ProbeMode<'a> {
    /// Looking at a struct field: is it a registered newtype?
    Field(&'a [&'static str]),
    /// Inside a registered newtype: is the content empty?
    Content,
}

struct Probe<'a> {
    mode: ProbeMode<'a>,
}

type ProbeResult = std::result::Result<bool, NotProbed>;

macro_rules! not_empty {
    ($($method:ident($ty:ty)),* $(,)?) => {
        $(
            fn $method(self, _v: $ty) -> ProbeResult {
                Ok(false)
            }
        )*
    };
}

impl ser::Serializer for Probe<'_> {
    type Ok = bool;
    type Error = NotProbed;
    type SerializeSeq = Impossible<bool, NotProbed>;
    type SerializeTuple = Impossible<bool, NotProbed>;
    type SerializeTupleStruct = Impossible<bool, NotProbed>;
    type SerializeTupleVariant = Impossible<bool, NotProbed>;
    type SerializeMap = Impossible<bool, NotProbed>;
    type SerializeStruct = Impossible<bool, NotProbed>;
    type SerializeStructVariant = Impossible<bool, NotProbed>;

    not_empty! {
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_f32(f32),
        serialize_f64(f64),
        serialize_char(char),
        serialize_bytes(&[u8]),
        serialize_unit_struct(&'static str),
    }

    fn serialize_str(self, v: &str) -> ProbeResult {
        Ok(matches!(self.mode, ProbeMode::Content) && v.is_empty())
    }

    fn serialize_none(self) -> ProbeResult {
        Ok(matches!(self.mode, ProbeMode::Content))
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> ProbeResult {
        value.serialize(self)
    }

    fn serialize_unit(self) -> ProbeResult {
        Ok(matches!(self.mode, ProbeMode::Content))
    }

    fn serialize_unit_variant(self, _name: &'static str, _index: u32, _variant: &'static str) -> ProbeResult {
        Ok(false)
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(self, name: &'static str, value: &T) -> ProbeResult {
        match self.mode {
            ProbeMode::Field(hooks) if hooks.contains(&name) => value.serialize(Probe {
                mode: ProbeMode::Content,
            }),
            _ => Ok(false),
        }
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> ProbeResult {
        Ok(false)
    }

    fn serialize_seq(self, _len: Option<usize>) -> std::result::Result<Self::SerializeSeq, NotProbed> {
        Err(NotProbed)
    }

    fn serialize_tuple(self, _len: usize) -> std::result::Result<Self::SerializeTuple, NotProbed> {
        Err(NotProbed)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> std::result::Result<Self::SerializeTupleStruct, NotProbed> {
        Err(NotProbed)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> std::result::Result<Self::SerializeTupleVariant, NotProbed> {
        Err(NotProbed)
    }

    fn serialize_map(self, _len: Option<usize>) -> std::result::Result<Self::SerializeMap, NotProbed> {
        Err(NotProbed)
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> std::result::Result<Self::SerializeStruct, NotProbed> {
        Err(NotProbed)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> std::result::Result<Self::SerializeStructVariant, NotProbed> {
        Err(NotProbed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use serde::Serialize;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Metadata {
        name: String,
        creation_timestamp: MetaTime,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Status {
        install_started: MetaTime,
        conditions: Vec<Condition>,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Condition {
        #[serde(rename = "type")]
        type_: String,
        last_probe_time: MetaTime,
    }

    #[derive(Serialize)]
    struct ClusterDeployment {
        metadata: Metadata,
        status: Option<Status>,
        labels: BTreeMap<String, String>,
    }

    fn scheme() -> Scheme {
        Scheme::new().with::<ClusterDeployment>("hive.openshift.io/v1", "ClusterDeployment")
    }

    fn sample(created: MetaTime) -> ClusterDeployment {
        ClusterDeployment {
            metadata: Metadata {
                name: "lab-1".to_string(),
                creation_timestamp: created,
            },
            status: None,
            labels: BTreeMap::from([("timezone".to_string(), "America/Panama".to_string())]),
        }
    }

    #[test]
    fn test_zero_time_is_omitted_not_null() {
        let bytes = serialize(&sample(MetaTime::zero()), &scheme()).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        let metadata = value["metadata"].as_object().unwrap();
        assert!(!metadata.contains_key("creationTimestamp"));
        assert_eq!(metadata["name"], "lab-1");

        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("creationTimestamp"));
    }

    #[test]
    fn test_plain_serde_json_writes_null() {
        // the behavior the serializer exists to avoid
        let value = serde_json::to_value(sample(MetaTime::zero())).unwrap();
        assert_eq!(value["metadata"]["creationTimestamp"], Value::Null);
    }

    #[test]
    fn test_non_zero_time_is_encoded() {
        let created = MetaTime::from(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap());
        let bytes = serialize(&sample(created), &scheme()).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["metadata"]["creationTimestamp"], "2024-05-06T07:08:09Z");
    }

    #[test]
    fn test_scheme_stamps_type_meta() {
        let bytes = serialize(&sample(MetaTime::zero()), &scheme()).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["apiVersion"], "hive.openshift.io/v1");
        assert_eq!(value["kind"], "ClusterDeployment");
    }

    #[test]
    fn test_unregistered_type_fails() {
        let err = serialize(&sample(MetaTime::zero()), &Scheme::new()).unwrap_err();
        assert!(matches!(err, CoreError::UnregisteredType { .. }));
    }

    #[test]
    fn test_nested_and_sequence_fields() {
        let mut cd = sample(MetaTime::zero());
        cd.status = Some(Status {
            install_started: MetaTime::zero(),
            conditions: vec![
                Condition {
                    type_: "Hibernating".to_string(),
                    last_probe_time: MetaTime::zero(),
                },
                Condition {
                    type_: "Ready".to_string(),
                    last_probe_time: MetaTime::from(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
                },
            ],
        });

        let value = Serializer::new().to_value(&cd).unwrap();

        assert_eq!(
            value["status"],
            json!({
                "conditions": [
                    {"type": "Hibernating"},
                    {"type": "Ready", "lastProbeTime": "2024-01-01T00:00:00Z"}
                ]
            })
        );
    }

    #[test]
    fn test_other_fields_untouched() {
        let value = Serializer::new().to_value(&sample(MetaTime::zero())).unwrap();
        assert_eq!(value["status"], Value::Null);
        assert_eq!(value["labels"]["timezone"], "America/Panama");
    }

    #[test]
    fn test_custom_newtype_hook() {
        #[derive(Serialize)]
        struct Token(Option<String>);

        #[derive(Serialize)]
        struct Holder {
            token: Token,
            other: Option<String>,
        }

        let holder = Holder {
            token: Token(None),
            other: None,
        };

        let default = Serializer::new().to_value(&holder).unwrap();
        assert_eq!(default, json!({"token": null, "other": null}));

        let hooked = Serializer::new().omit_empty("Token").to_value(&holder).unwrap();
        assert_eq!(hooked, json!({"other": null}));
    }
}
