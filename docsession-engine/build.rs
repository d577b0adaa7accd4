use std::env;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use tar::Archive;
use ureq::{AgentBuilder, Error as UreqError};
use walkdir::WalkDir;
use zip::read::ZipArchive;

const DEFAULT_PDFIUM_VERSION: &str = "7350";
const DEFAULT_RELEASE_PREFIX: &str = "chromium";
const DEFAULT_BASE_URL: &str = "https://github.com/bblanchon/pdfium-binaries/releases/download";

const ENV_VARS: &[&str] = &[
    "DOCSESSION_PDFIUM_SKIP_DOWNLOAD",
    "DOCSESSION_PDFIUM_ARCHIVE_PATH",
    "DOCSESSION_PDFIUM_VERSION",
    "DOCSESSION_PDFIUM_RELEASE_TAG",
    "DOCSESSION_PDFIUM_PLATFORM",
    "DOCSESSION_PDFIUM_BASE_URL",
    "DOCSESSION_FORCE_DOWNLOAD",
    "PDFIUM_DYNAMIC_LIB_PATH",
    "PDFIUM_STATIC_LIB_PATH",
];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for var in ENV_VARS {
        println!("cargo:rerun-if-env-changed={var}");
    }

    // Pdfium binds at runtime, so a failed fetch only costs the build-time hint.
    if let Err(err) = stage_pdfium() {
        println!("cargo:warning=pdfium not staged: {err:#}");
    }
}

fn stage_pdfium() -> Result<()> {
    if env::var_os("CARGO_FEATURE_PDF").is_none()
        || env::var_os("DOCSESSION_PDFIUM_SKIP_DOWNLOAD").is_some()
    {
        return Ok(());
    }

    if env::var_os("PDFIUM_DYNAMIC_LIB_PATH").is_some()
        || env::var_os("PDFIUM_STATIC_LIB_PATH").is_some()
    {
        return Ok(());
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").context("OUT_DIR env var not set")?);
    let staging_dir = out_dir.join("pdfium");
    fs::create_dir_all(&staging_dir).context("failed to create staging directory")?;

    let target_os =
        env::var("CARGO_CFG_TARGET_OS").context("CARGO_CFG_TARGET_OS env var missing")?;
    let target_arch =
        env::var("CARGO_CFG_TARGET_ARCH").context("CARGO_CFG_TARGET_ARCH env var missing")?;
    let platform = env::var("DOCSESSION_PDFIUM_PLATFORM")
        .unwrap_or_else(|_| default_platform(&target_os, &target_arch));

    if let Ok(path) = locate_library(&staging_dir, &target_os) {
        return write_rustc_env(&path);
    }

    let archive_path = match env::var_os("DOCSESSION_PDFIUM_ARCHIVE_PATH") {
        Some(path) => PathBuf::from(path),
        None => download_pdfium(&staging_dir, &platform)?,
    };
    extract_archive(&archive_path, &staging_dir)?;

    let library_path = locate_library(&staging_dir, &target_os)
        .with_context(|| format!("library missing from {:?} after extraction", staging_dir))?;
    write_rustc_env(&library_path)
}

fn write_rustc_env(path: &Path) -> Result<()> {
    let path = path
        .to_str()
        .ok_or_else(|| anyhow!("library path {:?} is not UTF-8", path))?;
    println!("cargo:rustc-env=DOCSESSION_PDFIUM_LIBRARY_PATH={path}");
    Ok(())
}

fn default_platform(target_os: &str, target_arch: &str) -> String {
    let os = match target_os {
        "macos" => "mac",
        other => other,
    };
    let arch = match target_arch {
        "aarch64" => "arm64",
        "x86_64" => "x64",
        other => other,
    };
    format!("{os}-{arch}")
}

fn library_filename(target_os: &str) -> &'static str {
    match target_os {
        "windows" => "pdfium.dll",
        "macos" => "libpdfium.dylib",
        _ => "libpdfium.so",
    }
}

fn locate_library(root: &Path, target_os: &str) -> Result<PathBuf> {
    let wanted = library_filename(target_os);
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .find(|entry| entry.file_type().is_file() && entry.file_name() == wanted)
        .map(|entry| entry.into_path())
        .ok_or_else(|| anyhow!("{wanted} not found under {:?}", root))
}

fn download_pdfium(staging_dir: &Path, platform: &str) -> Result<PathBuf> {
    let version = env::var("DOCSESSION_PDFIUM_VERSION")
        .unwrap_or_else(|_| DEFAULT_PDFIUM_VERSION.to_owned());
    let release_tag = env::var("DOCSESSION_PDFIUM_RELEASE_TAG")
        .unwrap_or_else(|_| format!("{DEFAULT_RELEASE_PREFIX}/{version}"));
    let base_url =
        env::var("DOCSESSION_PDFIUM_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());

    let cache = staging_dir.join("downloads");
    fs::create_dir_all(&cache).context("failed to create download cache directory")?;
    let force = env::var_os("DOCSESSION_FORCE_DOWNLOAD").is_some();

    let mut failures = Vec::new();
    for extension in ["tgz", "zip"] {
        for filename in [
            format!("pdfium-{platform}.{extension}"),
            format!("pdfium-{version}-{platform}.{extension}"),
        ] {
            let archive = cache.join(&filename);
            if archive.exists() && !force {
                return Ok(archive);
            }
            let url = format!(
                "{}/{}/{filename}",
                base_url.trim_end_matches('/'),
                release_tag.trim_matches('/')
            );
            match fetch_to(&url, &archive) {
                Ok(()) => return Ok(archive),
                Err(err) => failures.push(format!("{err:#}")),
            }
        }
    }

    Err(anyhow!(
        "no pdfium {version} archive for {platform}: {}",
        failures.join("; ")
    ))
}

fn fetch_to(url: &str, destination: &Path) -> Result<()> {
    let agent = AgentBuilder::new()
        .timeout_read(Duration::from_secs(120))
        .timeout_write(Duration::from_secs(120))
        .build();
    let response = agent.get(url).call().map_err(|err| match err {
        UreqError::Status(code, _) => anyhow!("GET {url}: HTTP {code}"),
        other => anyhow!("GET {url}: {other}"),
    })?;

    let mut file =
        File::create(destination).with_context(|| format!("failed to create {:?}", destination))?;
    io::copy(&mut response.into_reader(), &mut file)
        .with_context(|| format!("failed to write {:?}", destination))?;
    file.flush()?;
    Ok(())
}

fn extract_archive(archive: &Path, destination: &Path) -> Result<()> {
    fs::create_dir_all(destination)?;
    // Keep the download cache, drop everything from earlier extractions.
    for entry in fs::read_dir(destination)? {
        let entry = entry?;
        if entry.file_name() == "downloads" {
            continue;
        }
        let path = entry.path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.with_context(|| format!("failed to clear {:?}", path))?;
    }

    let file = File::open(archive).with_context(|| format!("failed to open {:?}", archive))?;
    match archive.extension().and_then(|ext| ext.to_str()) {
        Some("tgz" | "gz") => Archive::new(GzDecoder::new(file))
            .unpack(destination)
            .with_context(|| format!("failed to unpack {:?}", archive)),
        Some("zip") => ZipArchive::new(file)
            .and_then(|mut zip| zip.extract(destination))
            .with_context(|| format!("failed to extract {:?}", archive)),
        _ => Err(anyhow!("unsupported archive format for {:?}", archive)),
    }
}
