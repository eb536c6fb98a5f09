use datasheet_macros::resource_id;
use std::collections::BTreeMap;

#[resource_id(prefix = "rec")]
struct RecordId(String);

#[resource_id]
struct Revision(u64);

fn main() {
    let id = RecordId::generate();
    assert!(id.as_str().starts_with(RecordId::PREFIX));
    let _ = format!("{:?} {}", id, id);

    let parsed: RecordId = "rec1".parse().unwrap();
    assert_eq!(parsed, RecordId::from("rec1"));

    // Ord 派生使其可作为 BTreeMap 的键
    let mut map = BTreeMap::new();
    map.insert(parsed.clone(), 1);
    assert_eq!(map.get(&parsed), Some(&1));

    // serde_json 对 newtype struct 透明序列化
    assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"rec1\"");

    let rev = Revision::new(3u64);
    assert_eq!(*rev.value(), 3);
    let raw: u64 = rev.into();
    assert_eq!(raw, 3);
}
