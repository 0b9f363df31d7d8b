fn main() {
    if let Err(err) = activity_tracker_lib::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
