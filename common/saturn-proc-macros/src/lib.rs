mod encode;
mod enums;

use proc_macro::TokenStream;

/// Implement `bincode::Encode` as a no-op. Intended for runtime-only fields such as thread handles
/// or output buffers that are rebuilt after a state load.
#[proc_macro_derive(FakeEncode)]
pub fn fake_encode(input: TokenStream) -> TokenStream {
    encode::fake_encode(input)
}

/// Implement `bincode::Decode` and `bincode::BorrowDecode` by returning `Self::default()` without
/// consuming any input.
#[proc_macro_derive(FakeDecode)]
pub fn fake_decode(input: TokenStream) -> TokenStream {
    encode::fake_decode(input)
}

/// Implement `Display` and a `to_str(&self) -> &'static str` method for a fieldless enum. The
/// displayed string is the variant name.
#[proc_macro_derive(EnumDisplay)]
pub fn enum_display(input: TokenStream) -> TokenStream {
    enums::enum_display(input)
}

/// Implement `FromStr` for a fieldless enum, matching variant names case-insensitively.
#[proc_macro_derive(EnumFromStr)]
pub fn enum_from_str(input: TokenStream) -> TokenStream {
    enums::enum_from_str(input)
}

/// Add an associated constant `ALL` listing every variant in declaration order.
#[proc_macro_derive(EnumAll)]
pub fn enum_all(input: TokenStream) -> TokenStream {
    enums::enum_all(input)
}
