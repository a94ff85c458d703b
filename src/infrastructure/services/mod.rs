pub mod msc;
