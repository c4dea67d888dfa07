pub mod mathematics;
