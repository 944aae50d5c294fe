//! Defines helper macros for generating domain port error enums.
//!
//! Variants may be tagged `; retryable = true` after their message to mark
//! failures the pipeline driver should retry with backoff. Untagged variants
//! are terminal for the operation that raised them.

macro_rules! define_port_error {
    (@ctor $variant:ident) => {
        ::paste::paste! {
            pub fn [<$variant:snake>]() -> Self {
                Self::$variant
            }
        }
    };

    (@ctor $variant:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        define_port_error!(@ctor_impl $variant () () $( $field : $ty, )*);
    };

    (@ctor_impl $variant:ident ($($params:tt)*) ($($inits:tt)*) ) => {
        ::paste::paste! {
            pub fn [<$variant:snake>]($($params)*) -> Self {
                Self::$variant { $($inits)* }
            }
        }
    };

    (@ctor_impl $variant:ident ($($params:tt)*) ($($inits:tt)*) $field:ident : $ty:ty, $($rest:tt)*) => {
        define_port_error!(
            @ctor_impl
            $variant
            ($($params)* $field: impl Into<$ty>,)
            ($($inits)* $field: $field.into(),)
            $($rest)*
        );
    };

    (@retryable) => {
        false
    };

    (@retryable $retryable:expr) => {
        $retryable
    };

    (
        $(#[$outer:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident $( { $($field:ident : $ty:ty),* $(,)? } )? => $message:expr
                $( ; retryable = $retryable:expr )?
            ),* $(,)?
        }
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                #[error($message)]
                $variant $( { $($field : $ty),* } )?,
            )*
        }

        impl $name {
            $(
                define_port_error!(@ctor $variant $( { $($field : $ty),* } )?);
            )*

            /// Whether the failure is transient and worth retrying.
            pub fn is_retryable(&self) -> bool {
                match self {
                    $(
                        Self::$variant { .. } => define_port_error!(@retryable $($retryable)?),
                    )*
                }
            }
        }
    };
}

pub(crate) use define_port_error;

#[cfg(test)]
mod tests {
    //! Regression coverage for this module.
    define_port_error! {
        pub enum ExamplePortError {
            Foo { message: String } => "foo: {message}"; retryable = true,
            Bar { count: u32 } => "bar: {count}",
            Baz { message: String, count: u32 } => "baz: {message} ({count})",
            Gone => "gone",
        }
    }

    #[test]
    fn constructors_accept_str_for_string_fields() {
        let err = ExamplePortError::foo("hello");
        assert_eq!(err.to_string(), "foo: hello");
    }

    #[test]
    fn constructors_preserve_non_string_types() {
        let err = ExamplePortError::bar(42_u32);
        assert_eq!(err.to_string(), "bar: 42");
    }

    #[test]
    fn constructors_support_mixed_fields() {
        let err = ExamplePortError::baz("hello", 42_u32);
        assert_eq!(err.to_string(), "baz: hello (42)");
    }

    #[test]
    fn unit_variants_get_nullary_constructors() {
        assert_eq!(ExamplePortError::gone().to_string(), "gone");
    }

    #[test]
    fn only_tagged_variants_are_retryable() {
        assert!(ExamplePortError::foo("transient").is_retryable());
        assert!(!ExamplePortError::bar(1_u32).is_retryable());
        assert!(!ExamplePortError::baz("fatal", 2_u32).is_retryable());
        assert!(!ExamplePortError::gone().is_retryable());
    }
}
