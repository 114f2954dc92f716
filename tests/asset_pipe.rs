//! End-to-end round trip over the real named-pipe protocol: a server
//! backed by a live `CompilerHost`, a client connecting the way a running
//! game client would, and a worker loop draining whatever the client
//! requests.
#![cfg(all(unix, feature = "asset-pipe"))]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use asset_pipeline_core::asset_client::AssetClient;
use asset_pipeline_core::cache::Cache;
use asset_pipeline_core::compiler::{Compiler, CompilerHost};
use asset_pipeline_core::config::{CompilerConfig, ProjectPaths};
use asset_pipeline_core::converter::{Converter, ConverterFactory, ConverterFlags, ConverterInfo};
use asset_pipeline_core::dependency_list::DependencyList;
use asset_pipeline_core::jit::asset_server::AssetServer;
use asset_pipeline_core::jit::asset_pipe;
use asset_pipeline_core::rule::{ConversionDecision, ConversionRule};

const TXT_CONVERTER_ID: u64 = 0x545854; // "TXT"

struct TxtRule;
impl ConversionRule for TxtRule {
    fn matches(&self, path: &Path) -> Option<ConversionDecision> {
        if path.extension().map(|e| e == "txt").unwrap_or(false) {
            Some(ConversionDecision { converter_id: TXT_CONVERTER_ID, converter_version: "1.0".into(), converter_params: String::new() })
        } else {
            None
        }
    }
}

struct TxtConverter;
impl Converter for TxtConverter {
    fn create_dependencies(&mut self, _source_path: &Path, _compiler: &dyn Compiler, _dep_list: &mut DependencyList) -> bool {
        true
    }

    fn convert(&mut self, source_path: &Path, compiler: &dyn Compiler, _intermediate_out: &mut Vec<PathBuf>, final_out: &mut Vec<PathBuf>) -> bool {
        let Ok(bytes) = std::fs::read(source_path) else {
            compiler.set_error("could not read source");
            return false;
        };
        let output = compiler.resolve_output_path(Path::new(&format!(
            "{}.out",
            source_path.file_stem().unwrap().to_string_lossy()
        )));
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&output, bytes.to_ascii_uppercase()).unwrap();
        final_out.push(output);
        true
    }
}

struct TxtFactory;
impl ConverterFactory for TxtFactory {
    fn create(&self, _params: &str) -> Box<dyn Converter> {
        Box::new(TxtConverter)
    }
}

fn build_host(root: &Path) -> Arc<CompilerHost> {
    let paths = ProjectPaths::new(vec![root.to_path_buf()], root.join("_intermediate"), root.join("_output"));
    let host = Arc::new(CompilerHost::new(paths, CompilerConfig::default(), Cache::disabled()));
    host.register_conversion_rule(Box::new(TxtRule));
    host.register_converter(ConverterInfo::new("TxtConverter", "1.0", ConverterFlags::THREAD_SAFE), Box::new(TxtFactory)).unwrap();
    host
}

async fn wait_for_pipe(identity: &str) {
    let path = asset_pipe::pipe_path(identity);
    let deadline = Instant::now() + Duration::from_secs(5);
    while !path.exists() {
        assert!(Instant::now() < deadline, "asset server never created its pipe");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_request_reaches_the_server_and_gets_built() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("greeting.txt"), b"hello").unwrap();

    let host = build_host(root.path());
    let resource_roots = vec![root.path().to_path_buf()];
    let identity = asset_pipe::pipe_identity(&resource_roots);

    let server = Arc::new(AssetServer::new(host.clone()));
    let serve_roots = resource_roots.clone();
    tokio::spawn(async move {
        let _ = server.serve(&serve_roots).await;
    });
    wait_for_pipe(&identity).await;

    let worker_host = host.clone();
    std::thread::spawn(move || {
        while !worker_host.is_terminated() {
            asset_pipeline_core::processor::run_pool(worker_host.clone());
            std::thread::sleep(Duration::from_millis(20));
        }
    });

    let client = Arc::new(AssetClient::new(&resource_roots, None));
    tokio::task::spawn_blocking({
        let client = client.clone();
        move || client.request_asset("greeting.txt")
    })
    .await
    .unwrap()
    .unwrap();

    let output_path = root.path().join("_output").join("greeting.out");
    let deadline = Instant::now() + Duration::from_secs(5);
    while !output_path.exists() {
        assert!(Instant::now() < deadline, "requested asset was never built");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(std::fs::read(output_path).unwrap(), b"HELLO");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lock_and_unlock_round_trip_without_hanging() {
    let root = tempfile::tempdir().unwrap();
    let host = build_host(root.path());
    let resource_roots = vec![root.path().to_path_buf()];
    let identity = asset_pipe::pipe_identity(&resource_roots);

    let server = Arc::new(AssetServer::new(host));
    let serve_roots = resource_roots.clone();
    tokio::spawn(async move {
        let _ = server.serve(&serve_roots).await;
    });
    wait_for_pipe(&identity).await;

    let client = Arc::new(AssetClient::new(&resource_roots, None));
    tokio::task::spawn_blocking({
        let client = client.clone();
        move || -> asset_pipeline_core::error::Result<()> {
            client.lock()?;
            client.unlock()?;
            Ok(())
        }
    })
    .await
    .unwrap()
    .unwrap();
}
