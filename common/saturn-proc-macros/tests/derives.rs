use bincode::{Decode, Encode};
use saturn_proc_macros::{EnumAll, EnumDisplay, EnumFromStr, FakeDecode, FakeEncode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumDisplay, EnumFromStr, EnumAll)]
enum Backend {
    Null,
    Software,
    Hardware,
}

#[derive(Debug, Default, PartialEq, FakeEncode, FakeDecode)]
struct Scratch {
    pixels: Vec<u32>,
}

#[derive(Debug, PartialEq, Encode, Decode)]
struct Wrapper {
    before: u16,
    scratch: Scratch,
    after: u16,
}

#[test]
fn enum_strings_round_trip() {
    for backend in Backend::ALL {
        assert_eq!(backend.to_string().parse::<Backend>(), Ok(backend));
    }

    assert_eq!("HARDWARE".parse::<Backend>(), Ok(Backend::Hardware));
    assert!("vulkan".parse::<Backend>().is_err());
    assert_eq!(Backend::Software.to_str(), "Software");
}

#[test]
fn fake_fields_are_skipped() {
    let value = Wrapper { before: 1, scratch: Scratch { pixels: vec![1, 2, 3] }, after: 2 };

    let config = bincode::config::standard();
    let bytes = bincode::encode_to_vec(&value, config).unwrap();
    let (decoded, _): (Wrapper, usize) = bincode::decode_from_slice(&bytes, config).unwrap();

    assert_eq!(decoded, Wrapper { before: 1, scratch: Scratch::default(), after: 2 });
}
