fn main() {
    if let Err(err) = bilcount_lib::run() {
        log::error!("BilCount failed: {err:#}");
        eprintln!("BilCount failed: {err:#}");
        std::process::exit(1);
    }
}
