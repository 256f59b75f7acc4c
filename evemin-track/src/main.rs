//! Track camera motion in an event camera dataset

use anyhow::Context;
use clap::*;
use evemin::prelude::v1::{Result, *};
use log::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

struct TrackConfig {
    dataset: PathBuf,
    window: usize,
    output: PathBuf,
    params: DispersionParams,
    depth_scale: f64,
    min_depth: f64,
}

fn cli() -> Command<'static> {
    Command::new("evemin-track")
        .version(crate_version!())
        .author(crate_authors!())
        .arg(Arg::new("dataset").takes_value(true).required(true))
        .arg(Arg::new("window").takes_value(true).required(true))
        .arg(Arg::new("out-dir").takes_value(true).required(true))
        .arg(Arg::new("stem").takes_value(true).required(true))
        .arg(
            Arg::new("model")
                .long("model")
                .short('m')
                .takes_value(true)
                .possible_values([
                    "translation2d",
                    "rotation",
                    "similarity",
                    "translation-normal",
                    "six-dof",
                ])
                .default_value("translation2d"),
        )
        .arg(
            Arg::new("energy")
                .long("energy")
                .short('e')
                .takes_value(true)
                .possible_values(["potential", "tsallis"])
                .default_value("potential"),
        )
        .arg(
            Arg::new("alpha")
                .long("alpha")
                .takes_value(true)
                .default_value("2"),
        )
        .arg(Arg::new("min-step").long("min-step").takes_value(true))
        .arg(Arg::new("max-iter").long("max-iter").takes_value(true))
        .arg(Arg::new("w-size").long("w-size").takes_value(true))
        .arg(Arg::new("whiten").long("whiten").short('w'))
        .arg(
            Arg::new("depth-scale")
                .long("depth-scale")
                .takes_value(true)
                .default_value("1"),
        )
        .arg(
            Arg::new("min-depth")
                .long("min-depth")
                .takes_value(true)
                .default_value("0"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .takes_value(true),
        )
        .arg(Arg::new("save-config").long("save-config").takes_value(true))
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .value_of(name)
        .ok_or_else(|| anyhow!("missing {}", name))
}

/// Load estimator parameters, command line flags take precedence over the config file.
fn load_params(matches: &ArgMatches) -> Result<DispersionParams> {
    let mut params = match matches.value_of("config") {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("unable to open {}", path))?;
            serde_json::from_reader(file).with_context(|| format!("invalid config {}", path))?
        }
        None => DispersionParams::default(),
    };

    if let Some(min_step) = matches.value_of("min-step") {
        params.min_step = min_step.parse()?;
    }

    if let Some(max_iter) = matches.value_of("max-iter") {
        params.max_iter = max_iter.parse()?;
    }

    if let Some(w_size) = matches.value_of("w-size") {
        params.w_size = w_size.parse()?;
    }

    if matches.is_present("whiten") {
        params.whiten = true;
    }

    Ok(params)
}

/// Write a `ts v0 .. vK` estimate line.
///
/// The values are the warp parameters. Camera velocity is their negation.
fn write_estimate<W: Write, const N: usize>(out: &mut W, ts: f64, vars: &Vars<N>) -> Result<()> {
    write!(out, "{}", ts)?;
    for v in vars.iter() {
        write!(out, " {}", v)?;
    }
    writeln!(out)?;
    Ok(())
}

fn track<M, E, const D: usize, const N: usize>(
    model: M,
    energy: E,
    config: &TrackConfig,
) -> Result<()>
where
    M: Model<D, N>,
    E: Energy,
    Camera: Projection<D>,
{
    let mut source =
        event_loader::open_dataset::<D>(&config.dataset)?.with_min_depth(config.min_depth);

    let mut scale = Point::<D>::repeat(1.0);
    if D > 2 {
        scale[2] = config.depth_scale;
    }

    let mut estimator = IncrementalDispersion::new(
        model,
        energy,
        *source.camera(),
        config.params,
        config.window,
    )?
    .with_scale(scale);

    let mut out = BufWriter::new(
        File::create(&config.output)
            .with_context(|| format!("unable to write {}", config.output.display()))?,
    );

    let mut cnt = 0usize;

    while let Some(event) = source.next_event()? {
        estimator.run_event(&event);
        cnt += 1;

        if cnt % config.window == 0 {
            info!("ts: {}, vars: {:?}", event.ts, estimator.vars().as_slice());
            write_estimate(&mut out, event.ts, estimator.vars())?;
        }
    }

    out.flush()?;

    info!(
        "Processed {} events ({} skipped), estimates in {}",
        cnt,
        source.dropped(),
        config.output.display()
    );

    Ok(())
}

fn track_with_energy<M, const D: usize, const N: usize>(
    model: M,
    energy: &str,
    alpha: f64,
    config: &TrackConfig,
) -> Result<()>
where
    M: Model<D, N>,
    Camera: Projection<D>,
{
    match energy {
        "potential" => track(model, Potential, config),
        "tsallis" => track(model, Tsallis::new(alpha), config),
        _ => Err(anyhow!("unknown energy {}", energy)),
    }
}

fn output_path(out_dir: &Path, stem: &str) -> PathBuf {
    out_dir.join(format!("{}_estimates.txt", stem))
}

fn main() -> Result<()> {
    env_logger::init();

    let matches = cli().get_matches();

    let out_dir = Path::new(required(&matches, "out-dir")?);
    std::fs::create_dir_all(out_dir)?;

    let params = load_params(&matches)?;

    if let Some(path) = matches.value_of("save-config") {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, &params)?;
    }

    let config = TrackConfig {
        dataset: required(&matches, "dataset")?.into(),
        window: matches.value_of_t("window")?,
        output: output_path(out_dir, required(&matches, "stem")?),
        params,
        depth_scale: matches.value_of_t("depth-scale")?,
        min_depth: matches.value_of_t("min-depth")?,
    };

    let energy = required(&matches, "energy")?;
    let alpha = matches.value_of_t("alpha")?;

    match required(&matches, "model")? {
        "translation2d" => track_with_energy(Translation2D, energy, alpha, &config),
        "rotation" => track_with_energy(Rotation, energy, alpha, &config),
        "similarity" => track_with_energy(Similarity, energy, alpha, &config),
        "translation-normal" => track_with_energy(TranslationNormal, energy, alpha, &config),
        "six-dof" => track_with_energy(SixDof, energy, alpha, &config),
        model => Err(anyhow!("unknown model {}", model)),
    }
}
