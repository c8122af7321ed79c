use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{DeriveInput, GenericParam, Generics, Ident, Lifetime, LifetimeParam, TypeParam};

fn with_leading_params(generics: &Generics, lifetime: Option<&str>) -> Generics {
    let mut generics = generics.clone();
    generics
        .params
        .insert(0, GenericParam::Type(TypeParam::from(Ident::new("Context", Span::call_site()))));
    if let Some(lifetime) = lifetime {
        generics.params.insert(
            0,
            GenericParam::Lifetime(LifetimeParam::new(Lifetime::new(lifetime, Span::call_site()))),
        );
    }
    generics
}

pub fn fake_encode(input: TokenStream) -> TokenStream {
    let input: DeriveInput = syn::parse(input).expect("Unable to parse input");

    let type_ident = &input.ident;
    let (impl_generics, type_generics, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics ::bincode::Encode for #type_ident #type_generics #where_clause {
            fn encode<E: ::bincode::enc::Encoder>(
                &self,
                _encoder: &mut E,
            ) -> ::std::result::Result<(), ::bincode::error::EncodeError> {
                ::std::result::Result::Ok(())
            }
        }
    };

    expanded.into()
}

pub fn fake_decode(input: TokenStream) -> TokenStream {
    let input: DeriveInput = syn::parse(input).expect("Unable to parse input");

    let type_ident = &input.ident;
    let (_, type_generics, where_clause) = input.generics.split_for_impl();

    let decode_generics = with_leading_params(&input.generics, None);
    let (decode_impl_generics, _, _) = decode_generics.split_for_impl();

    let borrow_generics = with_leading_params(&input.generics, Some("'de"));
    let (borrow_impl_generics, _, _) = borrow_generics.split_for_impl();

    let expanded = quote! {
        impl #decode_impl_generics ::bincode::Decode<Context> for #type_ident #type_generics #where_clause {
            fn decode<D: ::bincode::de::Decoder<Context = Context>>(
                _decoder: &mut D,
            ) -> ::std::result::Result<Self, ::bincode::error::DecodeError> {
                ::std::result::Result::Ok(<Self as ::std::default::Default>::default())
            }
        }

        impl #borrow_impl_generics ::bincode::BorrowDecode<'de, Context> for #type_ident #type_generics #where_clause {
            fn borrow_decode<D: ::bincode::de::BorrowDecoder<'de, Context = Context>>(
                _decoder: &mut D,
            ) -> ::std::result::Result<Self, ::bincode::error::DecodeError> {
                ::std::result::Result::Ok(<Self as ::std::default::Default>::default())
            }
        }
    };

    expanded.into()
}
