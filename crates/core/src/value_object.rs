/// Immutable, compared by value: two `Money` amounts of 1.00 EUR are the same thing,
/// two customers with the same name are not. Changing one means building a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
