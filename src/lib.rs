pub mod config;
pub mod correspondence;
pub mod dataset;
pub mod detector;
pub mod feature;
pub mod frame;
pub mod image;
pub mod motion_filter;
pub mod my_types;
pub mod optical_flow;
pub mod point_search;
pub mod pyramid;
pub mod record;
pub mod session;
pub mod trajectory;
