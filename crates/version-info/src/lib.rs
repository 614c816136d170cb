pub fn version() -> &'static str {
    // See build.rs
    env!("DNSBGPD_CI_TAG")
}

pub fn target_triple() -> &'static str {
    // See build.rs
    env!("DNSBGPD_TARGET_TRIPLE")
}
