//! Problem validation before any mesh or operator is built.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::config::{InitialCondition, ProblemConfig};

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Unknown region '{name}' in {context}")]
    UnknownRegion { name: String, context: String },

    #[error("Invalid value: {field} = {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing section: {what}")]
    Missing { what: String },
}

fn invalid(field: impl Into<String>, value: impl ToString, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn known(names: &BTreeSet<String>, name: &str, context: &str) -> Result<(), ValidationError> {
    if names.contains(name) {
        Ok(())
    } else {
        Err(ValidationError::UnknownRegion {
            name: name.to_string(),
            context: context.to_string(),
        })
    }
}

pub fn validate_problem(config: &ProblemConfig) -> Result<(), ValidationError> {
    let mesh = &config.mesh;
    let dim = mesh.dimension();
    if !(1..=3).contains(&dim) || mesh.lo.len() != dim || mesh.hi.len() != dim {
        return Err(invalid(
            "mesh.cells",
            format!("{:?}", mesh.cells),
            "lo, hi and cells need the same length (1 to 3)",
        ));
    }
    if let Some(d) = (0..dim).find(|&d| mesh.cells[d] == 0 || !(mesh.hi[d] > mesh.lo[d])) {
        return Err(invalid(
            format!("mesh axis {d}"),
            format!("[{}, {}] / {}", mesh.lo[d], mesh.hi[d], mesh.cells[d]),
            "need hi > lo and at least one cell",
        ));
    }

    let fluid = &config.fluid;
    for (field, value) in [
        ("fluid.density", fluid.density),
        ("fluid.viscosity", fluid.viscosity),
        ("fluid.atmospheric_pressure", fluid.atmospheric_pressure),
    ] {
        if !(value > 0.0) {
            return Err(invalid(field, value, "must be positive"));
        }
    }
    if !(fluid.gravity >= 0.0) {
        return Err(invalid("fluid.gravity", fluid.gravity, "must be non-negative"));
    }

    if config.materials.is_empty() {
        return Err(ValidationError::Missing {
            what: "materials".into(),
        });
    }
    let cell_regions = mesh.cell_region_names();
    let face_regions = mesh.face_region_names();
    for (i, m) in config.materials.iter().enumerate() {
        known(&cell_regions, &m.region, &format!("materials[{i}]"))?;
        if !(m.porosity > 0.0 && m.porosity <= 1.0) {
            return Err(invalid(format!("materials[{i}].porosity"), m.porosity, "must be in (0, 1]"));
        }
        if !(m.specific_storage >= 0.0) {
            return Err(invalid(
                format!("materials[{i}].specific_storage"),
                m.specific_storage,
                "must be non-negative",
            ));
        }
        if let Err(e) = m.retention.build() {
            return Err(invalid(format!("materials[{i}].retention"), format!("{:?}", m.retention), e.to_string()));
        }
        if let Err(e) = m.permeability.to_matrix(dim, 0) {
            return Err(invalid(
                format!("materials[{i}].permeability"),
                format!("{:?}", m.permeability),
                e.to_string(),
            ));
        }
    }

    let n_args = 1 + dim;
    for (i, bc) in config.boundary_conditions.iter().enumerate() {
        let context = format!("boundary_conditions[{i}]");
        known(&face_regions, &bc.region, &context)?;
        if let Some(f) = &bc.function {
            f.validate(n_args)
                .map_err(|e| invalid(format!("{context}.function"), format!("{f:?}"), e.to_string()))?;
        }
    }
    for (i, s) in config.sources.iter().enumerate() {
        let context = format!("sources[{i}]");
        known(&cell_regions, &s.region, &context)?;
        s.function
            .validate(n_args)
            .map_err(|e| invalid(format!("{context}.function"), format!("{:?}", s.function), e.to_string()))?;
    }

    match config.initial {
        InitialCondition::Uniform { pressure } if !pressure.is_finite() => {
            return Err(invalid("initial.pressure", pressure, "must be finite"));
        }
        InitialCondition::Hydrostatic { water_table } if !water_table.is_finite() => {
            return Err(invalid("initial.water_table", water_table, "must be finite"));
        }
        _ => {}
    }

    config
        .solver
        .validate()
        .map_err(|reason| invalid("solver", "", reason))?;
    config
        .time
        .validate()
        .map_err(|reason| invalid("time", "", reason))?;
    if !(config.richards.operator.stability_scaling > 0.0) {
        return Err(invalid(
            "richards.operator.stability_scaling",
            config.richards.operator.stability_scaling,
            "must be positive",
        ));
    }
    Ok(())
}
