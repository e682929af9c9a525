extern crate keyserver;

use std::sync::Arc;

use keyserver::commons::KeyServerEmptyResult;
use keyserver::config::Config;
use keyserver::constants::KEYSERVER_APP;
use keyserver::server::{EventLoop, ServerContext};

fn start(config: &Config) -> KeyServerEmptyResult {
    let context = ServerContext::from_config(config)?;
    EventLoop::bind(config.socket_addr(), Arc::new(context))?.run()
}

fn main() {
    match Config::create() {
        Ok(config) => {
            if let Err(e) = start(&config) {
                eprintln!("{} failed to start: {}", KEYSERVER_APP, e);
                ::std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            ::std::process::exit(1);
        }
    }
}
