pub mod transcoder;

#[cfg(test)]
pub mod fakes;
