pub mod fallback;
pub mod normalize;
pub mod reconcile;
pub mod seat_layout;
