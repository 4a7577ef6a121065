pub mod asset;
pub mod bar;
pub mod market;
pub mod request_params;
pub mod timeframe;
pub mod timespan;
