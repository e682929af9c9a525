extern crate keyserver;

use keyserver::client::Options;
use keyserver::constants::KEYSERVER_CLIENT_APP;

fn main() {
    let options = Options::from_args();
    if let Err(e) = options.init_logging() {
        eprintln!("{}: {}", KEYSERVER_CLIENT_APP, e);
        ::std::process::exit(1);
    }
    if let Err(e) = options.run() {
        eprintln!("{}: {}", KEYSERVER_CLIENT_APP, e);
        ::std::process::exit(1);
    }
}
