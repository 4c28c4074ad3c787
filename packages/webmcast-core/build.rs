//! Generates FFI bindings for the optional codec backends.
//!
//! Nothing runs here unless the `libvorbis` / `libvpx` features are enabled;
//! the default build has no native dependencies.

fn main() {
    #[cfg(feature = "libvorbis")]
    generate_vorbis_bindings();
    #[cfg(feature = "libvpx")]
    generate_vpx_bindings();
}

#[cfg(any(feature = "libvorbis", feature = "libvpx"))]
fn out_path(file: &str) -> std::path::PathBuf {
    let out_dir = std::env::var("OUT_DIR").expect("OUT_DIR not set");
    std::path::Path::new(&out_dir).join(file)
}

#[cfg(any(feature = "libvorbis", feature = "libvpx"))]
fn include_args(library: &pkg_config::Library) -> Vec<String> {
    library
        .include_paths
        .iter()
        .map(|path| format!("-I{}", path.display()))
        .collect()
}

#[cfg(feature = "libvorbis")]
fn generate_vorbis_bindings() {
    let vorbisenc = pkg_config::Config::new()
        .probe("vorbisenc")
        .expect("pkg-config could not find vorbisenc (libvorbis development files)");
    pkg_config::Config::new()
        .probe("vorbis")
        .expect("pkg-config could not find vorbis");
    pkg_config::Config::new()
        .probe("ogg")
        .expect("pkg-config could not find ogg");

    let bindings = bindgen::Builder::default()
        .header_contents(
            "vorbis_wrapper.h",
            "#include <vorbis/codec.h>\n#include <vorbis/vorbisenc.h>\n",
        )
        .clang_args(include_args(&vorbisenc))
        .allowlist_function("vorbis_.*")
        .allowlist_type("vorbis_.*|ogg_.*")
        .allowlist_var("OV_.*")
        .prepend_enum_name(false)
        .generate()
        .expect("bindgen failed for libvorbis");
    bindings
        .write_to_file(out_path("vorbis_bindings.rs"))
        .expect("cannot write vorbis bindings");
}

#[cfg(feature = "libvpx")]
fn generate_vpx_bindings() {
    let vpx = pkg_config::Config::new()
        .probe("vpx")
        .expect("pkg-config could not find vpx (libvpx development files)");

    let bindings = bindgen::Builder::default()
        .header_contents(
            "vpx_wrapper.h",
            "#include <vpx/vpx_encoder.h>\n#include <vpx/vp8cx.h>\n",
        )
        .clang_args(include_args(&vpx))
        .allowlist_function("vpx_.*")
        .allowlist_type("vpx_.*|vp8e_.*|vp9e_.*")
        .allowlist_var("VPX_.*|VP8E_.*|VP9E_.*")
        .prepend_enum_name(false)
        .generate()
        .expect("bindgen failed for libvpx");
    bindings
        .write_to_file(out_path("vpx_bindings.rs"))
        .expect("cannot write vpx bindings");
}
