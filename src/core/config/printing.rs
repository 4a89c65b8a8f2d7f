use crate::core::config::data::Config;
use crate::mcp::timeouts::{DEFAULT_ENDPOINT_TIMEOUT_SECONDS, DEFAULT_REQUEST_TIMEOUT_SECONDS};

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        match &self.default_server {
            Some(server) => println!("  default-server: {server}"),
            None => println!("  default-server: (unset)"),
        }
        match self.request_timeout_secs {
            Some(secs) => println!("  request-timeout: {secs}s"),
            None => println!("  request-timeout: {DEFAULT_REQUEST_TIMEOUT_SECONDS}s (default)"),
        }
        match self.endpoint_timeout_secs {
            Some(secs) => println!("  endpoint-timeout: {secs}s"),
            None => println!("  endpoint-timeout: {DEFAULT_ENDPOINT_TIMEOUT_SECONDS}s (default)"),
        }
        if self.method_timeouts.is_empty() {
            println!("  method-timeouts: (none set)");
        } else {
            println!("  method-timeouts:");
            let mut methods: Vec<_> = self.method_timeouts.iter().collect();
            methods.sort();
            for (method, secs) in methods {
                println!("    {method}: {secs}s");
            }
        }
    }
}
