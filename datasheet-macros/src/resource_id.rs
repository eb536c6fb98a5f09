use crate::utils::apply_derives;
use proc_macro::TokenStream;
use quote::quote;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Item, Result, Token, parse::Parse, parse::ParseStream, parse_macro_input};

/// #[resource_id] 宏实现
/// 仅支持单字段 tuple struct，为包装类型：
/// - 合并/追加派生：Default, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash
/// - 提供 new(value)、value()、Display、FromStr、AsRef、From 等便捷实现
/// - 参数 `prefix = "rec"`：生成 `PREFIX` 常量、基于 ULID 的 `generate()`、`as_str()` 与 `From<&str>`
///   （要求内部类型为 String）
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let cfg = parse_macro_input!(attr as ResourceIdAttrConfig);
    let input = parse_macro_input!(item as Item);

    let st = match input {
        Item::Struct(s) => s,
        other => {
            return syn::Error::new(other.span(), "#[resource_id] only on struct")
                .to_compile_error()
                .into();
        }
    };

    let inner_ty = match &st.fields {
        syn::Fields::Unnamed(f) if f.unnamed.len() == 1 => match f.unnamed.first() {
            Some(field) => field.ty.clone(),
            None => unreachable!("length checked above"),
        },
        syn::Fields::Unnamed(f) => {
            return syn::Error::new(
                f.span(),
                "#[resource_id] requires a tuple struct with exactly one field",
            )
            .to_compile_error()
            .into();
        }
        _ => {
            return syn::Error::new(
                st.span(),
                "#[resource_id] supports only tuple struct, e.g., struct RecordId(String);",
            )
            .to_compile_error()
            .into();
        }
    };

    let mut st_out = st.clone();
    let required: Vec<syn::Path> = vec![
        syn::parse_quote!(Default),
        syn::parse_quote!(Clone),
        syn::parse_quote!(Debug),
        syn::parse_quote!(serde::Serialize),
        syn::parse_quote!(serde::Deserialize),
        syn::parse_quote!(PartialEq),
        syn::parse_quote!(Eq),
        syn::parse_quote!(PartialOrd),
        syn::parse_quote!(Ord),
        syn::parse_quote!(Hash),
    ];
    apply_derives(&mut st_out.attrs, required);

    let ident = &st_out.ident;
    let generics = st_out.generics.clone();
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let prefixed = cfg.prefix.map(|prefix| {
        quote! {
            impl #ident {
                /// 新生成标识的前缀
                pub const PREFIX: &'static str = #prefix;

                /// 生成带前缀的新标识（前缀 + ULID）
                pub fn generate() -> Self {
                    Self(::std::format!("{}{}", Self::PREFIX, ::ulid::Ulid::new()))
                }

                pub fn as_str(&self) -> &str { &self.0 }
            }

            impl ::core::convert::From<&str> for #ident {
                fn from(value: &str) -> Self { Self(value.to_string()) }
            }
        }
    });

    let out = quote! {
        #st_out

        impl #impl_generics #ident #ty_generics #where_clause {
            pub fn new(value: impl ::core::convert::Into<#inner_ty>) -> Self { Self(value.into()) }

            pub fn value(&self) -> &#inner_ty { &self.0 }
        }

        #prefixed

        impl #impl_generics ::std::str::FromStr for #ident #ty_generics #where_clause
        where #inner_ty: ::std::str::FromStr
        {
            type Err = <#inner_ty as ::std::str::FromStr>::Err;
            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                let inner: #inner_ty = s.parse()?;
                ::std::result::Result::Ok(Self(inner))
            }
        }

        impl #impl_generics ::std::fmt::Display for #ident #ty_generics #where_clause
        where #inner_ty: ::std::fmt::Display
        {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                ::std::write!(f, "{}", self.0)
            }
        }

        impl #impl_generics ::core::convert::AsRef<#inner_ty> for #ident #ty_generics #where_clause {
            fn as_ref(&self) -> &#inner_ty { &self.0 }
        }

        impl #impl_generics ::core::convert::From<#ident #ty_generics> for #inner_ty #where_clause {
            fn from(value: #ident #ty_generics) -> Self { value.0 }
        }

        impl #impl_generics ::core::convert::From<#inner_ty> for #ident #ty_generics #where_clause {
            fn from(value: #inner_ty) -> Self { Self(value) }
        }
    };

    TokenStream::from(out)
}

// -------- parsing --------

struct ResourceIdAttrConfig {
    prefix: Option<syn::LitStr>,
}

impl Parse for ResourceIdAttrConfig {
    fn parse(input: ParseStream) -> Result<Self> {
        if input.is_empty() {
            return Ok(Self { prefix: None });
        }

        let mut prefix: Option<syn::LitStr> = None;
        let pairs: Punctuated<ResourceIdAttrElem, Token![,]> = Punctuated::parse_terminated(input)?;

        for elem in pairs {
            match elem {
                ResourceIdAttrElem::Prefix(lit) => {
                    if prefix.is_some() {
                        return Err(syn::Error::new(
                            lit.span(),
                            "duplicate key 'prefix' in attribute",
                        ));
                    }
                    prefix = Some(lit);
                }
            }
        }
        Ok(Self { prefix })
    }
}

enum ResourceIdAttrElem {
    Prefix(syn::LitStr),
}

impl Parse for ResourceIdAttrElem {
    fn parse(input: ParseStream) -> Result<Self> {
        let key: syn::Ident = input.parse()?;
        if key == "prefix" {
            let _eq: Token![=] = input.parse()?;
            let lit: syn::LitStr = input.parse()?;
            Ok(Self::Prefix(lit))
        } else {
            Err(syn::Error::new(
                key.span(),
                "unknown key in attribute; expected 'prefix'",
            ))
        }
    }
}
