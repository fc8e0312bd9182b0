/// Implements the std arithmetic operator traits for single-field numeric newtypes by delegating to the inner value.
///
/// * `binary`: `Self op Self -> Self`
/// * `inplace`: `Self op= Self`
/// * `unary`: `op Self -> Self`
/// * `scale`: `Self op $rhs -> Self`, for a plain scalar factor
#[macro_export]
macro_rules! op {
    (binary $newtype:ident, $trait_name:ident, $method:ident) => {
        impl $trait_name for $newtype {
            type Output = Self;

            fn $method(self, rhs: Self) -> Self {
                Self(self.0.$method(rhs.0))
            }
        }
    };

    (inplace $newtype:ident, $trait_name:ident, $method:ident) => {
        impl $trait_name for $newtype {
            fn $method(&mut self, rhs: Self) {
                self.0.$method(rhs.0)
            }
        }
    };

    (unary $newtype:ident, $trait_name:ident, $method:ident) => {
        impl $trait_name for $newtype {
            type Output = Self;

            fn $method(self) -> Self {
                Self(self.0.$method())
            }
        }
    };

    (scale $newtype:ident, $trait_name:ident, $method:ident, $rhs:ty) => {
        impl $trait_name<$rhs> for $newtype {
            type Output = Self;

            fn $method(self, rhs: $rhs) -> Self {
                Self(self.0.$method(rhs))
            }
        }
    };
}
