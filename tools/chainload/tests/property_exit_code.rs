//! Exit code contract
//!
//! For any `ToolError` variant, `exit_code()` returns 1 or 2.
//! Infrastructure errors map to 2, operational errors map to 1.

use chainload::error::ToolError;
use chainloader::error::{FormatError, LoadError, RangeError, StorageError};
use proptest::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;

fn arb_format_error() -> impl Strategy<Value = FormatError> {
    prop_oneof![
        Just(FormatError::TooSmall),
        Just(FormatError::InvalidMagic),
        Just(FormatError::InvalidClass),
        Just(FormatError::InvalidEncoding),
        Just(FormatError::InvalidType),
        Just(FormatError::InvalidMachine),
        Just(FormatError::SectionTableOutOfBounds),
        Just(FormatError::InvalidStringTable),
        Just(FormatError::SectionOutOfBounds),
        Just(FormatError::MissingSection { name: ".text" }),
        any::<u32>().prop_map(|entry| FormatError::EntryOutsideText { entry }),
    ]
}

fn arb_load_error() -> impl Strategy<Value = LoadError> {
    prop_oneof![
        Just(LoadError::Storage(StorageError::NotFound)),
        Just(LoadError::Storage(StorageError::Unreadable)),
        (0..1_000_000usize, 0..1_000_000usize)
            .prop_map(|(expected, read)| {
                LoadError::Storage(StorageError::Truncated { expected, read })
            }),
        arb_format_error().prop_map(LoadError::Format),
        (any::<u32>(), any::<u32>()).prop_map(|(address, size)| LoadError::Range(RangeError {
            section: ".data",
            address,
            size,
            window_start: 0x0080_0000,
            window_end: 0x00FD_0000,
        })),
        any::<usize>().prop_map(|size| LoadError::Allocation { size }),
    ]
}

/// Strategy that produces an arbitrary `ToolError` variant.
fn arb_tool_error() -> impl Strategy<Value = ToolError> {
    let arb_string = "[a-zA-Z0-9_ /\\-\\.]{0,64}";

    (0..=6u8, arb_string, arb_format_error(), arb_load_error()).prop_map(
        |(tag, s, format, load)| match tag {
            // Infrastructure errors (exit code 2)
            0 => ToolError::ConfigNotFound {
                path: PathBuf::from(&s),
            },
            1 => ToolError::SdRootNotFound {
                path: PathBuf::from(&s),
            },
            // Operational errors (exit code 1)
            2 => ToolError::FileNotFound {
                path: PathBuf::from(&s),
            },
            3 => ToolError::InvalidImage {
                path: PathBuf::from(&s),
                source: format,
            },
            4 => ToolError::Load(load),
            _ => ToolError::NoPayloads { dir: s },
        },
    )
}

fn is_infrastructure(err: &ToolError) -> bool {
    matches!(
        err,
        ToolError::ConfigNotFound { .. }
            | ToolError::ConfigParse(_)
            | ToolError::SdRootNotFound { .. }
            | ToolError::Io(_)
            | ToolError::Json(_)
    )
}

fn is_operational(err: &ToolError) -> bool {
    matches!(
        err,
        ToolError::FileNotFound { .. }
            | ToolError::InvalidImage { .. }
            | ToolError::Load(_)
            | ToolError::NoPayloads { .. }
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn exit_code_is_1_or_2(err in arb_tool_error()) {
        let code = err.exit_code();
        prop_assert!(
            code == ExitCode::from(1) || code == ExitCode::from(2),
            "exit_code() must be 1 or 2, got {:?} for {:?}", code, err
        );
    }

    #[test]
    fn classification_matches_code(err in arb_tool_error()) {
        prop_assert!(is_infrastructure(&err) || is_operational(&err));
        let expected = if is_infrastructure(&err) { 2 } else { 1 };
        prop_assert_eq!(err.exit_code_num(), expected);
    }

    #[test]
    fn message_is_never_empty(err in arb_tool_error()) {
        prop_assert!(!err.to_string().is_empty());
    }
}

#[test]
fn io_error_is_infrastructure_exit_2() {
    let err = ToolError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "test"));
    assert!(is_infrastructure(&err));
    assert_eq!(err.exit_code(), ExitCode::from(2));
}

#[test]
fn toml_error_is_infrastructure_exit_2() {
    let toml_err = toml::from_str::<toml::Value>("a = [").unwrap_err();
    let err = ToolError::ConfigParse(toml_err);
    assert!(is_infrastructure(&err));
    assert_eq!(err.exit_code(), ExitCode::from(2));
}
