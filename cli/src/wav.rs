use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::error::Error;
use std::path::Path;

/// Write volts as mono 32-bit float samples, unscaled.
pub fn write_volts(path: &Path, samples: &[f64], sample_rate: u32) -> Result<(), Box<dyn Error>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample as f32)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Read a mono capture back as volts. 16-bit PCM is taken as full scale
/// of the ±10 V range.
pub fn read_volts(path: &Path) -> Result<(Vec<f64>, u32), Box<dyn Error>> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    if spec.channels != 1 {
        return Err(format!("Expected a mono capture, got {} channels", spec.channels).into());
    }

    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => {
            let float_samples: Result<Vec<f32>, _> = reader.samples::<f32>().collect();
            float_samples?.into_iter().map(f64::from).collect()
        }
        (SampleFormat::Int, 16) => {
            let int_samples: Result<Vec<i16>, _> = reader.samples::<i16>().collect();
            int_samples?
                .into_iter()
                .map(|s| s as f64 / 32768.0 * 10.0)
                .collect()
        }
        (format, bits) => {
            return Err(format!("Unsupported sample format: {:?} {} bits", format, bits).into());
        }
    };
    Ok((samples, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volts_survive_float_wav() {
        let dir = std::env::temp_dir().join(format!("lclink-wav-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("volts.wav");

        let samples = vec![0.0, 1.4, -1.4, 1.6, -1.6];
        write_volts(&path, &samples, 20_000).unwrap();
        let (back, rate) = read_volts(&path).unwrap();
        assert_eq!(rate, 20_000);
        for (a, b) in samples.iter().zip(&back) {
            assert!((a - b).abs() < 1e-6);
        }
        std::fs::remove_dir_all(&dir).ok();
    }
}
