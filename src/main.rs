fn main() {
    if let Err(error) = activaya_lib::run() {
        eprintln!("activaya: {error}");
        std::process::exit(1);
    }
}
