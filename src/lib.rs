pub mod archive;
pub mod config;
pub mod fetch;
pub mod parser;
pub mod pipeline;
pub mod quality;
pub mod records;
pub mod store;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
