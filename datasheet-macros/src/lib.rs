//! datasheet 领域过程宏
//!
//! - `#[resource_id]`：为单字段 tuple struct 形式的资源标识生成派生与转换实现；
//! - `#[value_object]`：为值对象合并常用派生（Clone/Debug/Serialize/Deserialize/PartialEq/Eq）。
//!
use proc_macro::TokenStream;

mod resource_id;
mod utils;
mod value_object;

/// 资源标识宏
///
/// 用于 `struct RecordId(String);` 形式的标识类型，可选参数 `prefix = "rec"`
/// 生成 `RecordId::generate()`（前缀 + ULID），调用方需依赖 `ulid` 与 `serde`。
#[proc_macro_attribute]
pub fn resource_id(attr: TokenStream, item: TokenStream) -> TokenStream {
    resource_id::expand(attr, item)
}

/// 值对象宏
///
/// 参数：`#[value_object(debug = false)]` 跳过 Debug 派生，
/// `#[value_object(eq = false)]` 跳过 Eq 派生（例如含 `f64` 字段时）。
#[proc_macro_attribute]
pub fn value_object(attr: TokenStream, item: TokenStream) -> TokenStream {
    value_object::expand(attr, item)
}
