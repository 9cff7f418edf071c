/*
xyz trajectories

Each frame is

    N
    comment (may be empty)
    Ar   x   y   z  [fx  fy  fz]     <- N lines, %12.8f columns

Frames are simply concatenated when appending. Reading keeps the raw rows,
so any atom count parses; the N >= 2 rule only applies when a frame is turned
into a Configuration.
*/

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::Vector3;

use crate::cluster::Configuration;
use crate::constants::ATOM_LABEL;
use crate::error::ClusterError;

#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub comment: String,
    pub positions: Vec<Vector3<f64>>,
    pub forces: Option<Vec<Vector3<f64>>>,
}

impl Frame {
    pub fn configuration(&self) -> Result<Configuration, ClusterError> {
        Configuration::new(self.positions.clone())
    }
}

pub fn write_xyz(
    path: impl AsRef<Path>,
    configuration: &Configuration,
    forces: Option<&[Vector3<f64>]>,
    append: bool,
    comment: &str,
) -> Result<(), ClusterError> {
    let path = path.as_ref();
    let path_str = path.display().to_string();
    let io_err = |source| ClusterError::Io {
        path: path_str.clone(),
        source,
    };

    if let Some(forces) = forces {
        if forces.len() != configuration.len() {
            return Err(ClusterError::invalid(format!(
                "{} force rows for {} atoms",
                forces.len(),
                configuration.len()
            )));
        }
    }
    if comment.contains('\n') {
        return Err(ClusterError::invalid("xyz comment must be a single line"));
    }

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(io_err)?;
    let mut out = BufWriter::new(file);

    writeln!(out, "{}", configuration.len()).map_err(io_err)?;
    writeln!(out, "{comment}").map_err(io_err)?;
    for (i, p) in configuration.positions().iter().enumerate() {
        match forces {
            Some(forces) => {
                let f = forces[i];
                writeln!(
                    out,
                    "{ATOM_LABEL} {:12.8} {:12.8} {:12.8} {:12.8} {:12.8} {:12.8}",
                    p.x, p.y, p.z, f.x, f.y, f.z
                )
            }
            None => writeln!(out, "{ATOM_LABEL} {:12.8} {:12.8} {:12.8}", p.x, p.y, p.z),
        }
        .map_err(io_err)?;
    }
    out.flush().map_err(io_err)
}

pub fn read_xyz(path: impl AsRef<Path>) -> Result<Vec<Frame>, ClusterError> {
    let path = path.as_ref();
    let path_str = path.display().to_string();
    let file = File::open(path).map_err(|source| ClusterError::Io {
        path: path_str.clone(),
        source,
    })?;
    let lines = BufReader::new(file)
        .lines()
        .collect::<Result<Vec<String>, _>>()
        .map_err(|source| ClusterError::Io {
            path: path_str.clone(),
            source,
        })?;
    let parse_err = |line: usize, reason: String| ClusterError::Parse {
        path: path_str.clone(),
        line,
        reason,
    };

    let mut frames = Vec::new();
    let mut cursor = 0;
    while cursor < lines.len() {
        if lines[cursor].trim().is_empty() {
            cursor += 1;
            continue;
        }
        let header = lines[cursor].trim();
        let natoms: usize = header.parse().map_err(|_| {
            parse_err(cursor + 1, format!("expected an atom count, got `{header}`"))
        })?;
        let comment = lines
            .get(cursor + 1)
            .ok_or_else(|| parse_err(cursor + 2, "missing comment line".to_string()))?
            .clone();
        let first_atom = cursor + 2;
        if first_atom + natoms > lines.len() {
            return Err(parse_err(
                lines.len(),
                format!("frame announces {natoms} atoms but the file ends early"),
            ));
        }

        let mut positions = Vec::with_capacity(natoms);
        let mut forces = Vec::with_capacity(natoms);
        let mut has_forces = None;
        for (offset, line) in lines[first_atom..first_atom + natoms].iter().enumerate() {
            let line_no = first_atom + offset + 1;
            let cols: Vec<&str> = line.split_whitespace().collect();
            let with_forces = match cols.len() {
                4 => false,
                7 => true,
                n => {
                    return Err(parse_err(
                        line_no,
                        format!("expected 4 or 7 columns, found {n}"),
                    ))
                }
            };
            if *has_forces.get_or_insert(with_forces) != with_forces {
                return Err(parse_err(line_no, "mixed rows with and without forces".to_string()));
            }
            let values = cols[1..]
                .iter()
                .map(|c| c.parse::<f64>())
                .collect::<Result<Vec<f64>, _>>()
                .map_err(|e| parse_err(line_no, format!("bad number: {e}")))?;
            positions.push(Vector3::new(values[0], values[1], values[2]));
            if with_forces {
                forces.push(Vector3::new(values[3], values[4], values[5]));
            }
        }

        frames.push(Frame {
            comment,
            positions,
            forces: has_forces.unwrap_or(false).then_some(forces),
        });
        cursor = first_atom + natoms;
    }
    Ok(frames)
}
