pub mod chart;
pub mod stats_txt;
