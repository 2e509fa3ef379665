use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Default)]
struct ConfigSection {
    page_size: Option<usize>,
    max_small: Option<usize>,
    span_pages: Option<usize>,
    thread_free_block_threshold: Option<usize>,
    max_delay_count: Option<usize>,
    max_delay_interval_ms: Option<u64>,
    max_span_slots: Option<usize>,
    max_pages: Option<usize>,
}

#[derive(Deserialize, Default)]
struct Config {
    #[serde(default)]
    config: ConfigSection,
}

struct ResolvedConfig {
    page_size: usize,
    page_shift: u32,
    max_small: usize,
    span_pages: usize,
    thread_free_block_threshold: usize,
    max_delay_count: usize,
    max_delay_interval_ms: u64,
    max_span_slots: usize,
    max_pages: usize,
}

fn resolve_config(cfg: &ConfigSection) -> ResolvedConfig {
    let page_size = cfg.page_size.unwrap_or(4096);
    assert!(
        page_size > 0 && page_size.is_power_of_two(),
        "page_size ({}) must be a power of 2",
        page_size
    );
    assert!(
        page_size >= 4096,
        "page_size ({}) must be >= 4096",
        page_size
    );

    let max_small = cfg.max_small.unwrap_or(256 * 1024);
    let span_pages = cfg.span_pages.unwrap_or(8);
    let thread_free_block_threshold = cfg.thread_free_block_threshold.unwrap_or(64);
    let max_delay_count = cfg.max_delay_count.unwrap_or(48);
    let max_delay_interval_ms = cfg.max_delay_interval_ms.unwrap_or(1000);
    let max_span_slots = cfg.max_span_slots.unwrap_or(16384);
    let max_pages = cfg.max_pages.unwrap_or(128);

    assert!(
        max_small % 8 == 0,
        "max_small ({}) must be 8-byte aligned",
        max_small
    );
    assert!(
        max_small >= page_size,
        "max_small ({}) must be >= page_size ({})",
        max_small,
        page_size
    );
    assert!(span_pages > 0, "span_pages must be > 0");
    assert!(
        thread_free_block_threshold >= 4,
        "thread_free_block_threshold ({}) must be >= 4 (a quarter is retained on overflow)",
        thread_free_block_threshold
    );
    assert!(max_delay_count > 0, "max_delay_count must be > 0");
    assert!(max_delay_interval_ms > 0, "max_delay_interval_ms must be > 0");
    assert!(max_span_slots > 0, "max_span_slots must be > 0");
    assert!(max_pages > 0, "max_pages must be > 0");
    assert!(
        max_small.div_ceil(page_size).max(span_pages) <= max_pages,
        "max_pages ({}) must cover the largest span a size class can request",
        max_pages
    );

    ResolvedConfig {
        page_size,
        page_shift: page_size.trailing_zeros(),
        max_small,
        span_pages,
        thread_free_block_threshold,
        max_delay_count,
        max_delay_interval_ms,
        max_span_slots,
        max_pages,
    }
}

fn default_config_path() -> String {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    format!("{}/cmpool.toml", manifest_dir)
}

fn generate_config(cfg: &ResolvedConfig, out_path: &Path) {
    let code = format!(
        "// Auto-generated by build.rs. Do not edit.\n\n\
         pub const PAGE_SHIFT: usize = {};\n\
         pub const PAGE_SIZE: usize = {};\n\
         pub const MAX_SMALL: usize = {};\n\
         pub const SPAN_PAGES: usize = {};\n\
         pub const THREAD_FREE_BLOCK_THRESHOLD: usize = {};\n\
         pub const MAX_DELAY_COUNT: usize = {};\n\
         pub const MAX_DELAY_INTERVAL_MS: u64 = {};\n\
         pub const MAX_SPAN_SLOTS: usize = {};\n\
         pub const MAX_PAGES: usize = {};\n",
        cfg.page_shift,
        cfg.page_size,
        cfg.max_small,
        cfg.span_pages,
        cfg.thread_free_block_threshold,
        cfg.max_delay_count,
        cfg.max_delay_interval_ms,
        cfg.max_span_slots,
        cfg.max_pages,
    );
    fs::write(out_path, code).expect("failed to write config_gen.rs");
}

fn main() {
    println!("cargo:rerun-if-env-changed=CMPOOL_CONFIG");

    let out_dir = env::var("OUT_DIR").unwrap();

    let config_path = env::var("CMPOOL_CONFIG").unwrap_or_else(|_| default_config_path());
    println!("cargo:rerun-if-changed={}", config_path);
    let content = fs::read_to_string(&config_path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", config_path, e));

    let config: Config = toml::from_str(&content).expect("failed to parse TOML config");

    let resolved = resolve_config(&config.config);
    generate_config(&resolved, &Path::new(&out_dir).join("config_gen.rs"));
}
