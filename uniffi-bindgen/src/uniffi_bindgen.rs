//! Generates Kotlin and Swift bindings for `policykit-core`.

fn main() {
    uniffi::uniffi_bindgen_main();
}
