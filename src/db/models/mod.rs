pub mod captured_item;

pub use captured_item::{
    CapturedItem, ItemKey, ItemQuery, NewCapturedItem, TagMatch, UNKNOWN_PERIOD,
};
