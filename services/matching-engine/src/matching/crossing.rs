//! Crossing detection logic
//!
//! Determines when two orders of opposite sides can trade

use types::numeric::Price;
use types::order::{Order, Side};

/// Check if a bid and ask can match at given limit prices
pub fn limit_crosses(bid_price: Price, ask_price: Price) -> bool {
    bid_price >= ask_price
}

/// Check if two orders can trade with each other
///
/// Both need quantity left. A market order on either side always matches;
/// two limit orders match when the buy price is at least the sell price.
pub fn can_match(a: &Order, b: &Order) -> bool {
    if a.remaining() == 0 || b.remaining() == 0 {
        return false;
    }
    if a.side == b.side {
        return false;
    }
    if a.is_market() || b.is_market() {
        return true;
    }
    match a.side {
        Side::Buy => limit_crosses(a.price, b.price),
        Side::Sell => limit_crosses(b.price, a.price),
    }
}
