//! Operator boilerplate for integer newtypes.
//!
//! `op!(binary T, Add, add)` implements `T + T`, `op!(inplace T, AddAssign, add_assign)` implements `T += T` and
//! `op!(unary T, Neg, neg)` implements `-T`. The newtype must wrap its value in field `.0` and implement `From` for it.

#[macro_export]
macro_rules! op {
    (binary $type:ty, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $type {
            type Output = Self;

            fn $method(self, rhs: Self) -> Self::Output {
                Self::from(std::ops::$trait::$method(self.0, rhs.0))
            }
        }
    };
    (inplace $type:ty, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $type {
            fn $method(&mut self, rhs: Self) {
                std::ops::$trait::$method(&mut self.0, rhs.0)
            }
        }
    };
    (unary $type:ty, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $type {
            type Output = Self;

            fn $method(self) -> Self::Output {
                Self::from(std::ops::$trait::$method(self.0))
            }
        }
    };
}
