use textplots::{Chart, Plot, Shape};

use crate::waveform::WaveformRecord;

/// Determine the best scale and unit prefix for a given maximum value
fn determine_scale(max_value: f64) -> (f64, &'static str) {
    if max_value >= 1.0 {
        (1.0, "")
    } else if max_value >= 1e-3 {
        (1e3, "m")
    } else if max_value >= 1e-6 {
        (1e6, "μ")
    } else if max_value >= 1e-9 {
        (1e9, "n")
    } else {
        (1e12, "p")
    }
}

fn value_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

/// Plot any slice of f64 values against their sample index
///
/// # Arguments
/// * `values` - The data values to plot
/// * `title` - Optional title for the plot
/// * `width` - Optional plot width (default: 140)
/// * `height` - Optional plot height (default: 60)
///
/// # Examples
/// ```
/// use rusty_scope::plotting::plot_values;
///
/// let data = vec![0.1, 0.3, 0.2, 0.4];
/// plot_values(&data, Some("CHAN1 samples"), None, None).unwrap();
/// ```
pub fn plot_values(
    values: &[f64],
    title: Option<&str>,
    width: Option<usize>,
    height: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    if values.is_empty() {
        return Err("Cannot plot empty data".into());
    }

    let width = width.unwrap_or(140);
    let height = height.unwrap_or(60);

    let (min_value, max_value) = value_range(values.iter().copied());
    let (value_scale, value_unit) = determine_scale(max_value.abs().max(min_value.abs()));

    let frame: Vec<(f32, f32)> = values
        .iter()
        .enumerate()
        .map(|(i, &value)| (i as f32, (value * value_scale) as f32))
        .collect();

    println!("{}", title.unwrap_or("Data Plot"));
    println!("X-axis: Sample Index | Y-axis: {}units", value_unit);
    println!(
        "Range: {} samples | Values: {:.3} to {:.3} {}units",
        values.len(),
        min_value * value_scale,
        max_value * value_scale,
        value_unit
    );
    println!("{}", "─".repeat(width));

    let x_max = (values.len() - 1).max(1) as f32;
    Chart::new(width as u32, height as u32, 0.0, x_max)
        .lineplot(&Shape::Lines(&frame))
        .nice();

    println!("Sample Index →");

    Ok(())
}

/// Plot a decoded waveform as voltage over time
pub fn plot_waveform(
    record: &WaveformRecord,
    title: Option<&str>,
    width: Option<usize>,
    height: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    if record.is_empty() {
        return Err("Cannot plot empty waveform".into());
    }

    let width = width.unwrap_or(140);
    let height = height.unwrap_or(60);

    let (t_min, t_max) = value_range(record.times());
    let (v_min, v_max) = value_range(record.voltages());
    let (time_scale, time_unit) = determine_scale(t_min.abs().max(t_max.abs()));
    let (volt_scale, volt_unit) = determine_scale(v_min.abs().max(v_max.abs()));

    let frame: Vec<(f32, f32)> = record
        .samples()
        .iter()
        .map(|s| ((s.time * time_scale) as f32, (s.voltage * volt_scale) as f32))
        .collect();

    let x_min = (t_min * time_scale) as f32;
    let mut x_max = (t_max * time_scale) as f32;
    if x_max <= x_min {
        x_max = x_min + 1.0;
    }

    println!("{}", title.unwrap_or("Waveform"));
    println!("X-axis: {}s | Y-axis: {}V", time_unit, volt_unit);
    println!(
        "{} samples | {:.3} to {:.3} {}V",
        record.len(),
        v_min * volt_scale,
        v_max * volt_scale,
        volt_unit
    );
    println!("{}", "─".repeat(width));

    Chart::new(width as u32, height as u32, x_min, x_max)
        .lineplot(&Shape::Lines(&frame))
        .nice();

    println!("Time ({}s) →", time_unit);

    Ok(())
}
