//! Shorthands for building [`crate::error::MetadataError`] values at the failing callsite.

/// Builds a [`crate::error::MetadataError`].
///
/// Takes an [`ErrorKind`](crate::error::ErrorKind) and a static description, then
/// optionally anything implementing `Display` as detail, and `source = <error>` after the
/// detail to keep the driver error that caused it.
#[macro_export]
macro_rules! metastore_error {
    ($kind:expr, $desc:expr $(,)?) => {
        $crate::error::MetadataError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr $(,)?) => {
        $crate::error::MetadataError::from(($kind, $desc, ::std::string::ToString::to_string(&$detail)))
    };
    ($kind:expr, $desc:expr, $detail:expr, source = $source:expr $(,)?) => {
        $crate::metastore_error!($kind, $desc, $detail).with_source($source)
    };
}

/// Returns `Err` from the enclosing function with a [`crate::error::MetadataError`] built
/// by [`metastore_error!`].
#[macro_export]
macro_rules! bail {
    ($($arg:tt)+) => {
        return ::core::result::Result::Err($crate::metastore_error!($($arg)+))
    };
}
