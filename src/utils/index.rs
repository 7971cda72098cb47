use crate::wallet::SATOSHI_PER_BITCOIN;

/// Converts minor units into the display unit.
pub fn to_display_amount(amount: u64) -> f64 {
	amount as f64 / SATOSHI_PER_BITCOIN as f64
}

pub fn format_amount(amount: u64) -> String {
	format!("{:.8}", to_display_amount(amount))
}
