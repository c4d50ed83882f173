//! Typed exit codes: a small, low-valued codes get a named variant,
//! everything else falls back to `Generic`. The Rust-idiomatic stand-in
//! for the reference implementation's dynamically-generated per-code
//! exception classes (spec.md §7/§9).

macro_rules! error_return_code {
    ($($n:literal => $name:ident),* $(,)?) => {
        /// A child's exit code, named for the first 25 values and generic
        /// past that. Constructed from the raw code via `From<i32>`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ErrorReturnCode {
            $(
                #[doc = concat!("Exit code `", stringify!($n), "`.")]
                $name,
            )*
            /// Any exit code without a dedicated variant, including every
            /// negative (signalled) code.
            Generic(i32),
        }

        impl From<i32> for ErrorReturnCode {
            fn from(code: i32) -> Self {
                match code {
                    $($n => Self::$name,)*
                    other => Self::Generic(other),
                }
            }
        }

        impl ErrorReturnCode {
            /// The raw numeric code this variant represents.
            #[must_use]
            pub fn code(self) -> i32 {
                match self {
                    $(Self::$name => $n,)*
                    Self::Generic(n) => n,
                }
            }
        }
    };
}

error_return_code! {
    1 => One,
    2 => Two,
    3 => Three,
    4 => Four,
    5 => Five,
    6 => Six,
    7 => Seven,
    8 => Eight,
    9 => Nine,
    10 => Ten,
    11 => Eleven,
    12 => Twelve,
    13 => Thirteen,
    14 => Fourteen,
    15 => Fifteen,
    16 => Sixteen,
    17 => Seventeen,
    18 => Eighteen,
    19 => Nineteen,
    20 => Twenty,
    21 => TwentyOne,
    22 => TwentyTwo,
    23 => TwentyThree,
    24 => TwentyFour,
    25 => TwentyFive,
}

#[cfg(test)]
mod tests {
    use super::ErrorReturnCode;

    #[test]
    fn small_codes_get_named_variants() {
        assert_eq!(ErrorReturnCode::from(7), ErrorReturnCode::Seven);
        assert_eq!(ErrorReturnCode::Seven.code(), 7);
    }

    #[test]
    fn codes_outside_the_named_range_fall_back_to_generic() {
        assert_eq!(ErrorReturnCode::from(42), ErrorReturnCode::Generic(42));
        assert_eq!(ErrorReturnCode::from(-15), ErrorReturnCode::Generic(-15));
    }
}
