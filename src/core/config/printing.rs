use crate::core::config::data::{Config, DEFAULT_LOG_LEVEL};

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        match &self.backend_url {
            Some(url) => println!("  backend-url: {url}"),
            None => println!("  backend-url: {} (default)", self.backend_url()),
        }
        match self.request_timeout_secs {
            Some(secs) => println!("  request-timeout-secs: {secs}"),
            None => println!("  request-timeout-secs: (unset)"),
        }
        match &self.log_level {
            Some(level) => println!("  log-level: {level}"),
            None => println!("  log-level: {DEFAULT_LOG_LEVEL} (default)"),
        }
        match &self.streaming_marker {
            Some(marker) => println!("  streaming-marker: {marker:?}"),
            None => println!("  streaming-marker: {:?} (default)", self.streaming_marker()),
        }
    }
}
