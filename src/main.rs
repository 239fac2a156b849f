fn main() {
    #[cfg(feature = "cli")]
    deltafs::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("deltafs: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
