fn main() {
    if let Err(e) = soapscribe_lib::run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
