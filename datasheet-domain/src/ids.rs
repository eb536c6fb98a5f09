//! 资源标识（Identifiers）
//!
//! 各类资源使用独立的 newtype，避免在调用处混用字符串 ID。
//!
use datasheet_macros::resource_id;

#[resource_id(prefix = "dst")]
pub struct DatasheetId(String);

#[resource_id(prefix = "rec")]
pub struct RecordId(String);

#[resource_id(prefix = "fld")]
pub struct FieldId(String);

#[resource_id(prefix = "viw")]
pub struct ViewId(String);

#[resource_id(prefix = "opt")]
pub struct OptionId(String);

#[resource_id(prefix = "usr")]
pub struct UserId(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_prefix_and_are_unique() {
        let a = RecordId::generate();
        let b = RecordId::generate();
        assert!(a.as_str().starts_with("rec"));
        assert_ne!(a, b);
        assert!(FieldId::generate().as_str().starts_with("fld"));
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = DatasheetId::from("dst1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"dst1\"");
        let back: DatasheetId = serde_json::from_str("\"dst1\"").unwrap();
        assert_eq!(back, id);
        assert_eq!(id.to_string(), "dst1");
    }
}
