#[macro_use]
extern crate clap;
extern crate meshline_tcp;
#[macro_use]
extern crate log;
extern crate pretty_env_logger;

use clap::{App, Arg};
use std::fs::File;
use std::io::Read;
use std::process;

fn main() {
    pretty_env_logger::init().expect("could not initialize logger");

    let opts = mk_app().get_matches();
    let config_path = opts.value_of(CONFIG_PATH_ARG).unwrap();

    let config_str = {
        let mut s = String::new();
        File::open(config_path).expect("could not open config file").read_to_string(&mut s).expect("could not read config file");
        s
    };

    let config = meshline_tcp::config::from_str(&config_str).expect("configuration error");

    if let Err(e) = meshline_tcp::app::run(config) {
        error!("{}", e);
        process::exit(1);
    }
}

static CONFIG_PATH_ARG: &'static str = "PATH";

fn mk_app() -> App<'static, 'static> {
    App::new(crate_name!())
        .version(crate_version!())
        .about("A native TCP proxy data plane: cluster membership, TCP proxying, and Thrift framing")
        .arg(Arg::with_name(CONFIG_PATH_ARG).required(true).index(1).help("Config file path."))
}
