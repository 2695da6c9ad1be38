fn main() {
    if let Err(err) = blueprint_assist::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
