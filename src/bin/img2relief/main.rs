// img2relief - Turn one image into a depth map asset and a relief mesh
//
// Pipeline:
//   1. Decode the image
//   2. Estimate depth (local MiDaS model if one is given, else the remote
//      model if GEMINI_API_KEY is set, else the local proxy)
//   3. Normalize depth to the image footprint
//   4. Build the displacement mesh
//   5. Export depth_<stem>.png and, with --obj, <stem>.obj
//
// Usage: cargo run --bin img2relief -- <image> [--out DIR] [--resolution N]
//        [--scale S] [--offline] [--obj] [--config FILE] [--model FILE]

mod export;

use anyhow::{Context, bail};
use std::env;
use std::fs;
use std::path::PathBuf;
use tracing::info;

use relief_engine::config::{LocalModelConfig, MeshConfig, RemoteConfig};
use relief_engine::logger;
use relief_engine::pipeline::{Pipeline, PipelineState};

const USAGE: &str = "<image> [--out DIR] [--resolution N] [--scale S] [--offline] [--obj] [--config FILE] [--model FILE]";

#[derive(Debug, PartialEq)]
struct Args {
    image: PathBuf,
    out: PathBuf,
    resolution: Option<u32>,
    scale: Option<f32>,
    offline: bool,
    obj: bool,
    config: Option<PathBuf>,
    model: Option<PathBuf>,
}

impl Args {
    fn parse(args: &[String]) -> anyhow::Result<Self> {
        let Some(image) = args.first() else {
            bail!("missing input image");
        };
        let mut parsed = Args {
            image: PathBuf::from(image),
            out: PathBuf::from("."),
            resolution: None,
            scale: None,
            offline: false,
            obj: false,
            config: None,
            model: None,
        };

        let value = |i: usize| {
            args.get(i + 1)
                .with_context(|| format!("{} needs a value", args[i]))
        };

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--out" => { parsed.out = PathBuf::from(value(i)?); i += 2; }
                "--resolution" => {
                    parsed.resolution = Some(value(i)?.parse().context("--resolution expects an integer")?);
                    i += 2;
                }
                "--scale" => {
                    parsed.scale = Some(value(i)?.parse().context("--scale expects a number")?);
                    i += 2;
                }
                "--config" => { parsed.config = Some(PathBuf::from(value(i)?)); i += 2; }
                "--model" => { parsed.model = Some(PathBuf::from(value(i)?)); i += 2; }
                "--offline" => { parsed.offline = true; i += 1; }
                "--obj" => { parsed.obj = true; i += 1; }
                other => bail!("unknown argument {other}"),
            }
        }
        Ok(parsed)
    }

    fn mesh_config(&self) -> anyhow::Result<MeshConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
            }
            None => MeshConfig::default(),
        };
        if let Some(resolution) = self.resolution {
            config.resolution = resolution;
        }
        if let Some(scale) = self.scale {
            config.displacement_scale = scale;
        }
        Ok(config)
    }

    fn local_model(&self) -> LocalModelConfig {
        let mut local = LocalModelConfig::from_env();
        if let Some(model) = &self.model {
            local.model_path = Some(model.clone());
        }
        local
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init();

    let argv: Vec<String> = env::args().collect();
    let args = match Args::parse(argv.get(1..).unwrap_or_default()) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}\nUsage: {} {USAGE}", argv.first().map(String::as_str).unwrap_or("img2relief"));
            std::process::exit(1);
        }
    };

    let mesh_config = args.mesh_config()?;
    let remote = if args.offline { RemoteConfig::default() } else { RemoteConfig::from_env() };

    let bytes = fs::read(&args.image).with_context(|| format!("reading {}", args.image.display()))?;
    info!(image = %args.image.display(), resolution = mesh_config.resolution, "processing");

    let pipeline = Pipeline::from_config(&remote, &args.local_model(), mesh_config);
    let token = pipeline.submit(bytes);
    let reconstruction = match pipeline.wait_for(token).await {
        PipelineState::Ready(reconstruction) => reconstruction,
        PipelineState::Failed { message, .. } => bail!("reconstruction failed: {message}"),
        other => bail!("pipeline stopped while {}", other.name()),
    };

    let stem = args
        .image
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    fs::create_dir_all(&args.out).with_context(|| format!("creating {}", args.out.display()))?;

    let result = &reconstruction.result;
    let depth_path = export::write_depth_png(&args.out, stem, &result.depth)?;
    info!(path = result.path.as_str(), file = %depth_path.display(), "depth map written");

    if args.obj {
        let obj_path = export::write_obj(&args.out, stem, &reconstruction.mesh)?;
        info!(
            file = %obj_path.display(),
            vertices = reconstruction.mesh.vertex_count(),
            max_displacement = reconstruction.mesh.max_displacement(),
            "mesh written"
        );
    }

    println!("{} ({}x{}, {} path)", depth_path.display(), result.depth.width(), result.depth.height(), result.path.as_str());
    Ok(())
}
