fn main() {
    // ESP-IDF link arguments are only needed for the Xtensa firmware build;
    // host builds (tests, host-link) skip embuild entirely.
    let xtensa = std::env::var("TARGET").is_ok_and(|target| target.contains("xtensa"));
    if xtensa {
        embuild::espidf::sysenv::output();
    }
}
