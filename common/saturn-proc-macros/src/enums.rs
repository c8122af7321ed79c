use proc_macro::TokenStream;
use proc_macro2::Ident;
use quote::quote;
use syn::{Data, DeriveInput, Fields};

fn parse_unit_enum(input: TokenStream, macro_name: &str) -> (DeriveInput, Vec<Ident>) {
    let ast: DeriveInput = syn::parse(input).expect("Unable to parse input");

    let name = &ast.ident;
    let Data::Enum(data) = &ast.data else {
        panic!("{macro_name} can only be derived for enums; {name} is not an enum");
    };

    let variants = data
        .variants
        .iter()
        .map(|variant| {
            let variant_ident = &variant.ident;
            assert!(
                matches!(variant.fields, Fields::Unit),
                "{macro_name} only supports fieldless variants; {name}::{variant_ident} has fields"
            );
            variant_ident.clone()
        })
        .collect();

    (ast, variants)
}

pub fn enum_display(input: TokenStream) -> TokenStream {
    let (ast, variants) = parse_unit_enum(input, "EnumDisplay");
    let name = &ast.ident;

    let names = variants.iter().map(Ident::to_string);
    let expanded = quote! {
        impl #name {
            #[must_use]
            pub fn to_str(&self) -> &'static str {
                match self {
                    #(Self::#variants => #names,)*
                }
            }
        }

        impl ::std::fmt::Display for #name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.to_str())
            }
        }
    };

    expanded.into()
}

pub fn enum_from_str(input: TokenStream) -> TokenStream {
    let (ast, variants) = parse_unit_enum(input, "EnumFromStr");
    let name = &ast.ident;

    let lowercase_names = variants.iter().map(|variant| variant.to_string().to_ascii_lowercase());
    let err_fmt_string = format!("invalid {name} string: '{{}}'");
    let expanded = quote! {
        impl ::std::str::FromStr for #name {
            type Err = ::std::string::String;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    #(#lowercase_names => ::std::result::Result::Ok(Self::#variants),)*
                    _ => ::std::result::Result::Err(::std::format!(#err_fmt_string, s)),
                }
            }
        }
    };

    expanded.into()
}

pub fn enum_all(input: TokenStream) -> TokenStream {
    let (ast, variants) = parse_unit_enum(input, "EnumAll");
    let name = &ast.ident;

    let num_variants = variants.len();
    let expanded = quote! {
        impl #name {
            pub const ALL: [Self; #num_variants] = [#(Self::#variants,)*];
        }
    };

    expanded.into()
}
