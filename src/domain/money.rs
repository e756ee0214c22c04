use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Money is stored as integer minor units (cents) to avoid floating-point drift.
/// 1 display unit = 100 cents, so 50.00 = 5000 cents.
pub type Cents = i64;

/// Number of decimal places between display units and minor units.
pub const MINOR_UNIT_SCALE: u32 = 2;

/// Convert a display-unit amount into minor units.
///
/// The amount is scaled by 100 and then truncated toward zero, never rounded:
/// 1.553 -> 155, -1.559 -> -155. Returns `None` if the result does not fit in
/// [`Cents`].
pub fn to_minor_units(amount: Decimal) -> Option<Cents> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)?
        .trunc()
        .to_i64()
}

/// Convert minor units back into a display-unit amount with two decimal places.
/// Example: 5502 -> 55.02
pub fn to_display(cents: Cents) -> Decimal {
    Decimal::new(cents, MINOR_UNIT_SCALE)
}

/// Format cents as a human-readable currency string.
/// Example: 5000 -> "50.00", -1234 -> "-12.34"
pub fn format_cents(cents: Cents) -> String {
    to_display(cents).to_string()
}
