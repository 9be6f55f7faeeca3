pub mod platform_a;
pub mod platform_b;
