#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![doc = include_str!("../README.md")]

pub mod config;
pub mod conn;
pub mod lane;
pub mod packet;
pub mod pool;
pub mod rtt;
pub mod seq;
pub mod seq_buf;
