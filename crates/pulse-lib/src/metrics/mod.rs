pub mod bpm;
