fn main() {
    if let Err(err) = node::run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}
