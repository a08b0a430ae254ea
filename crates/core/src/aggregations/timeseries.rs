//! Time series metadata elements and data file synchronisation.
//!
//! A time series aggregation wraps an observations database. Its
//! metadata is a set of element lists (sites, variables, methods,
//! processing levels, results), where each result describes one series
//! and the other elements link to series through series id lists.
//!
//! Element codes and result series ids bind an element for life: the
//! patch types deliberately omit them, so a caller can only change the
//! mutable fields. Moving a series between two elements of the same
//! kind goes through the rebinding methods, which validate at runtime.
//!
//! Edits do not touch the data file immediately. Each update records a
//! [`DataFileChange`]; a later synchronisation pass hands the pending
//! changes to a [`DataFilePatcher`] together with the file bytes, and
//! the pending list is cleared only after the patched bytes are stored.

use cdr_types::NonEmptyText;

use crate::error::{CoreError, CoreResult};

/// A controlled vocabulary table in the observations database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CvTableKind {
    SiteType,
    ElevationDatum,
    VariableName,
    VariableType,
    Speciation,
    MethodType,
    UnitsType,
    Status,
    Medium,
    AggregationStatistic,
}

/// One pending edit that the data file has not absorbed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataFileChange {
    /// A site was created, updated, or rebound.
    SiteUpdated { code: String },
    /// A variable was created, updated, or rebound.
    VariableUpdated { code: String },
    /// A method was created, updated, or rebound.
    MethodUpdated { code: String },
    /// A processing level was created, updated, or rebound.
    ProcessingLevelUpdated { code: String },
    /// A result was created or updated.
    ResultUpdated { series_id: String },
    /// A term must exist in a controlled vocabulary table.
    CvTermAdded { table: CvTableKind, term: String },
}

/// Applies pending metadata changes to the bytes of a data file.
///
/// Implementors understand the concrete database format; the core
/// only moves bytes and bookkeeping.
pub trait DataFilePatcher: Send + Sync {
    /// Returns the patched file content.
    ///
    /// # Errors
    ///
    /// Implementors should return `CoreError::DataFileUpdate` when the
    /// bytes cannot be patched.
    fn apply(&self, bytes: Vec<u8>, changes: &[DataFileChange]) -> CoreResult<Vec<u8>>;
}

/// An observation site.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    code: NonEmptyText,
    name: NonEmptyText,
    site_type: Option<NonEmptyText>,
    elevation_m: Option<f64>,
    elevation_datum: Option<NonEmptyText>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    series_ids: Vec<String>,
}

/// The mutable fields of a [`Site`].
#[derive(Debug, Default)]
pub struct SitePatch {
    pub name: Option<NonEmptyText>,
    pub site_type: Option<NonEmptyText>,
    pub elevation_m: Option<f64>,
    pub elevation_datum: Option<NonEmptyText>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Site {
    /// Builds a site with the given immutable code.
    #[must_use]
    pub fn new(code: NonEmptyText, name: NonEmptyText) -> Self {
        Self {
            code,
            name,
            site_type: None,
            elevation_m: None,
            elevation_datum: None,
            latitude: None,
            longitude: None,
            series_ids: Vec::new(),
        }
    }

    /// Applies a patch before the site joins any metadata.
    #[must_use]
    pub fn with(mut self, patch: SitePatch) -> Self {
        apply_site_patch(&mut self, patch);
        self
    }

    #[must_use]
    pub fn code(&self) -> &str {
        self.code.as_str()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    #[must_use]
    pub fn site_type(&self) -> Option<&str> {
        self.site_type.as_ref().map(NonEmptyText::as_str)
    }

    #[must_use]
    pub fn elevation_m(&self) -> Option<f64> {
        self.elevation_m
    }

    #[must_use]
    pub fn elevation_datum(&self) -> Option<&str> {
        self.elevation_datum.as_ref().map(NonEmptyText::as_str)
    }

    #[must_use]
    pub fn latitude(&self) -> Option<f64> {
        self.latitude
    }

    #[must_use]
    pub fn longitude(&self) -> Option<f64> {
        self.longitude
    }

    /// Returns the series this site is linked to.
    #[must_use]
    pub fn series_ids(&self) -> &[String] {
        &self.series_ids
    }
}

fn apply_site_patch(site: &mut Site, patch: SitePatch) {
    if let Some(name) = patch.name {
        site.name = name;
    }
    if let Some(site_type) = patch.site_type {
        site.site_type = Some(site_type);
    }
    if let Some(elevation) = patch.elevation_m {
        site.elevation_m = Some(elevation);
    }
    if let Some(datum) = patch.elevation_datum {
        site.elevation_datum = Some(datum);
    }
    if let Some(latitude) = patch.latitude {
        site.latitude = Some(latitude);
    }
    if let Some(longitude) = patch.longitude {
        site.longitude = Some(longitude);
    }
}

/// An observed variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    code: NonEmptyText,
    name: NonEmptyText,
    variable_type: Option<NonEmptyText>,
    no_data_value: Option<f64>,
    definition: Option<NonEmptyText>,
    speciation: Option<NonEmptyText>,
    series_ids: Vec<String>,
}

/// The mutable fields of a [`Variable`].
#[derive(Debug, Default)]
pub struct VariablePatch {
    pub name: Option<NonEmptyText>,
    pub variable_type: Option<NonEmptyText>,
    pub no_data_value: Option<f64>,
    pub definition: Option<NonEmptyText>,
    pub speciation: Option<NonEmptyText>,
}

impl Variable {
    /// Builds a variable with the given immutable code.
    #[must_use]
    pub fn new(code: NonEmptyText, name: NonEmptyText) -> Self {
        Self {
            code,
            name,
            variable_type: None,
            no_data_value: None,
            definition: None,
            speciation: None,
            series_ids: Vec::new(),
        }
    }

    /// Applies a patch before the variable joins any metadata.
    #[must_use]
    pub fn with(mut self, patch: VariablePatch) -> Self {
        apply_variable_patch(&mut self, patch);
        self
    }

    #[must_use]
    pub fn code(&self) -> &str {
        self.code.as_str()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    #[must_use]
    pub fn variable_type(&self) -> Option<&str> {
        self.variable_type.as_ref().map(NonEmptyText::as_str)
    }

    #[must_use]
    pub fn no_data_value(&self) -> Option<f64> {
        self.no_data_value
    }

    #[must_use]
    pub fn definition(&self) -> Option<&str> {
        self.definition.as_ref().map(NonEmptyText::as_str)
    }

    #[must_use]
    pub fn speciation(&self) -> Option<&str> {
        self.speciation.as_ref().map(NonEmptyText::as_str)
    }

    /// Returns the series this variable is linked to.
    #[must_use]
    pub fn series_ids(&self) -> &[String] {
        &self.series_ids
    }
}

fn apply_variable_patch(variable: &mut Variable, patch: VariablePatch) {
    if let Some(name) = patch.name {
        variable.name = name;
    }
    if let Some(variable_type) = patch.variable_type {
        variable.variable_type = Some(variable_type);
    }
    if let Some(no_data_value) = patch.no_data_value {
        variable.no_data_value = Some(no_data_value);
    }
    if let Some(definition) = patch.definition {
        variable.definition = Some(definition);
    }
    if let Some(speciation) = patch.speciation {
        variable.speciation = Some(speciation);
    }
}

/// An observation method.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesMethod {
    code: NonEmptyText,
    name: NonEmptyText,
    method_type: Option<NonEmptyText>,
    description: Option<NonEmptyText>,
    link: Option<NonEmptyText>,
    series_ids: Vec<String>,
}

/// The mutable fields of a [`TimeSeriesMethod`].
#[derive(Debug, Default)]
pub struct MethodPatch {
    pub name: Option<NonEmptyText>,
    pub method_type: Option<NonEmptyText>,
    pub description: Option<NonEmptyText>,
    pub link: Option<NonEmptyText>,
}

impl TimeSeriesMethod {
    /// Builds a method with the given immutable code.
    #[must_use]
    pub fn new(code: NonEmptyText, name: NonEmptyText) -> Self {
        Self {
            code,
            name,
            method_type: None,
            description: None,
            link: None,
            series_ids: Vec::new(),
        }
    }

    /// Applies a patch before the method joins any metadata.
    #[must_use]
    pub fn with(mut self, patch: MethodPatch) -> Self {
        apply_method_patch(&mut self, patch);
        self
    }

    #[must_use]
    pub fn code(&self) -> &str {
        self.code.as_str()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    #[must_use]
    pub fn method_type(&self) -> Option<&str> {
        self.method_type.as_ref().map(NonEmptyText::as_str)
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_ref().map(NonEmptyText::as_str)
    }

    #[must_use]
    pub fn link(&self) -> Option<&str> {
        self.link.as_ref().map(NonEmptyText::as_str)
    }

    /// Returns the series this method is linked to.
    #[must_use]
    pub fn series_ids(&self) -> &[String] {
        &self.series_ids
    }
}

fn apply_method_patch(method: &mut TimeSeriesMethod, patch: MethodPatch) {
    if let Some(name) = patch.name {
        method.name = name;
    }
    if let Some(method_type) = patch.method_type {
        method.method_type = Some(method_type);
    }
    if let Some(description) = patch.description {
        method.description = Some(description);
    }
    if let Some(link) = patch.link {
        method.link = Some(link);
    }
}

/// A data processing level.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingLevel {
    code: NonEmptyText,
    definition: Option<NonEmptyText>,
    explanation: Option<NonEmptyText>,
    series_ids: Vec<String>,
}

/// The mutable fields of a [`ProcessingLevel`].
#[derive(Debug, Default)]
pub struct ProcessingLevelPatch {
    pub definition: Option<NonEmptyText>,
    pub explanation: Option<NonEmptyText>,
}

impl ProcessingLevel {
    /// Builds a processing level with the given immutable code.
    #[must_use]
    pub fn new(code: NonEmptyText) -> Self {
        Self {
            code,
            definition: None,
            explanation: None,
            series_ids: Vec::new(),
        }
    }

    /// Applies a patch before the level joins any metadata.
    #[must_use]
    pub fn with(mut self, patch: ProcessingLevelPatch) -> Self {
        apply_processing_level_patch(&mut self, patch);
        self
    }

    #[must_use]
    pub fn code(&self) -> &str {
        self.code.as_str()
    }

    #[must_use]
    pub fn definition(&self) -> Option<&str> {
        self.definition.as_ref().map(NonEmptyText::as_str)
    }

    #[must_use]
    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_ref().map(NonEmptyText::as_str)
    }

    /// Returns the series this level is linked to.
    #[must_use]
    pub fn series_ids(&self) -> &[String] {
        &self.series_ids
    }
}

fn apply_processing_level_patch(level: &mut ProcessingLevel, patch: ProcessingLevelPatch) {
    if let Some(definition) = patch.definition {
        level.definition = Some(definition);
    }
    if let Some(explanation) = patch.explanation {
        level.explanation = Some(explanation);
    }
}

/// One series of observations.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesResult {
    series_id: NonEmptyText,
    value_count: u64,
    units_type: Option<NonEmptyText>,
    units_name: Option<NonEmptyText>,
    units_abbreviation: Option<NonEmptyText>,
    status: Option<NonEmptyText>,
    sample_medium: Option<NonEmptyText>,
    aggregation_statistic: Option<NonEmptyText>,
    series_label: Option<NonEmptyText>,
}

/// The mutable fields of a [`TimeSeriesResult`].
///
/// The series id and the value count come from the data file and are
/// not patchable.
#[derive(Debug, Default)]
pub struct ResultPatch {
    pub units_type: Option<NonEmptyText>,
    pub units_name: Option<NonEmptyText>,
    pub units_abbreviation: Option<NonEmptyText>,
    pub status: Option<NonEmptyText>,
    pub sample_medium: Option<NonEmptyText>,
    pub aggregation_statistic: Option<NonEmptyText>,
    pub series_label: Option<NonEmptyText>,
}

impl TimeSeriesResult {
    /// Builds a result for one series.
    #[must_use]
    pub fn new(series_id: NonEmptyText, value_count: u64) -> Self {
        Self {
            series_id,
            value_count,
            units_type: None,
            units_name: None,
            units_abbreviation: None,
            status: None,
            sample_medium: None,
            aggregation_statistic: None,
            series_label: None,
        }
    }

    /// Applies a patch before the result joins any metadata.
    #[must_use]
    pub fn with(mut self, patch: ResultPatch) -> Self {
        apply_result_patch(&mut self, patch);
        self
    }

    #[must_use]
    pub fn series_id(&self) -> &str {
        self.series_id.as_str()
    }

    #[must_use]
    pub fn value_count(&self) -> u64 {
        self.value_count
    }

    #[must_use]
    pub fn units_type(&self) -> Option<&str> {
        self.units_type.as_ref().map(NonEmptyText::as_str)
    }

    #[must_use]
    pub fn units_name(&self) -> Option<&str> {
        self.units_name.as_ref().map(NonEmptyText::as_str)
    }

    #[must_use]
    pub fn units_abbreviation(&self) -> Option<&str> {
        self.units_abbreviation.as_ref().map(NonEmptyText::as_str)
    }

    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.status.as_ref().map(NonEmptyText::as_str)
    }

    #[must_use]
    pub fn sample_medium(&self) -> Option<&str> {
        self.sample_medium.as_ref().map(NonEmptyText::as_str)
    }

    #[must_use]
    pub fn aggregation_statistic(&self) -> Option<&str> {
        self.aggregation_statistic.as_ref().map(NonEmptyText::as_str)
    }

    #[must_use]
    pub fn series_label(&self) -> Option<&str> {
        self.series_label.as_ref().map(NonEmptyText::as_str)
    }
}

fn apply_result_patch(result: &mut TimeSeriesResult, patch: ResultPatch) {
    if let Some(units_type) = patch.units_type {
        result.units_type = Some(units_type);
    }
    if let Some(units_name) = patch.units_name {
        result.units_name = Some(units_name);
    }
    if let Some(units_abbreviation) = patch.units_abbreviation {
        result.units_abbreviation = Some(units_abbreviation);
    }
    if let Some(status) = patch.status {
        result.status = Some(status);
    }
    if let Some(sample_medium) = patch.sample_medium {
        result.sample_medium = Some(sample_medium);
    }
    if let Some(statistic) = patch.aggregation_statistic {
        result.aggregation_statistic = Some(statistic);
    }
    if let Some(label) = patch.series_label {
        result.series_label = Some(label);
    }
}

/// The element lists of one time series aggregation.
#[derive(Debug, Default)]
pub struct TimeSeriesMetadata {
    sites: Vec<Site>,
    variables: Vec<Variable>,
    methods: Vec<TimeSeriesMethod>,
    processing_levels: Vec<ProcessingLevel>,
    results: Vec<TimeSeriesResult>,
    pending: Vec<DataFileChange>,
}

impl TimeSeriesMetadata {
    /// Returns the sites, in insertion order.
    #[must_use]
    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    /// Returns the variables, in insertion order.
    #[must_use]
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Returns the methods, in insertion order.
    #[must_use]
    pub fn methods(&self) -> &[TimeSeriesMethod] {
        &self.methods
    }

    /// Returns the processing levels, in insertion order.
    #[must_use]
    pub fn processing_levels(&self) -> &[ProcessingLevel] {
        &self.processing_levels
    }

    /// Returns the results, in insertion order.
    #[must_use]
    pub fn results(&self) -> &[TimeSeriesResult] {
        &self.results
    }

    /// Returns the edits the data file has not absorbed yet.
    #[must_use]
    pub fn pending_changes(&self) -> &[DataFileChange] {
        &self.pending
    }

    /// Returns true when the data file is behind the metadata.
    #[must_use]
    pub fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn clear_pending(&mut self) {
        self.pending.clear();
    }

    fn push_pending(&mut self, change: DataFileChange) {
        if !self.pending.contains(&change) {
            self.pending.push(change);
        }
    }

    fn push_cv_terms(&mut self, terms: &[(CvTableKind, Option<&str>)]) {
        for (table, term) in terms {
            if let Some(term) = term {
                self.push_pending(DataFileChange::CvTermAdded {
                    table: *table,
                    term: (*term).to_string(),
                });
            }
        }
    }

    /// Adds a result for a series not seen before.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when the series id is taken.
    pub fn add_result(&mut self, result: TimeSeriesResult) -> CoreResult<()> {
        if self.results.iter().any(|r| r.series_id() == result.series_id()) {
            return Err(CoreError::Validation(format!(
                "a result for series '{}' already exists",
                result.series_id()
            )));
        }
        self.push_pending(DataFileChange::ResultUpdated {
            series_id: result.series_id().to_string(),
        });
        self.push_cv_terms(&[
            (CvTableKind::UnitsType, result.units_type()),
            (CvTableKind::Status, result.status()),
            (CvTableKind::Medium, result.sample_medium()),
            (
                CvTableKind::AggregationStatistic,
                result.aggregation_statistic(),
            ),
        ]);
        self.results.push(result);
        Ok(())
    }

    /// Updates the mutable fields of a result.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when no result has the series id.
    pub fn update_result(&mut self, series_id: &str, patch: ResultPatch) -> CoreResult<()> {
        let index = self
            .results
            .iter()
            .position(|r| r.series_id() == series_id)
            .ok_or_else(|| CoreError::NotFound(format!("no result for series '{series_id}'")))?;
        apply_result_patch(&mut self.results[index], patch);
        let result = &self.results[index];
        let terms = [
            (CvTableKind::UnitsType, result.units_type().map(str::to_string)),
            (CvTableKind::Status, result.status().map(str::to_string)),
            (CvTableKind::Medium, result.sample_medium().map(str::to_string)),
            (
                CvTableKind::AggregationStatistic,
                result.aggregation_statistic().map(str::to_string),
            ),
        ];
        self.push_pending(DataFileChange::ResultUpdated {
            series_id: series_id.to_string(),
        });
        for (table, term) in terms {
            if let Some(term) = term {
                self.push_pending(DataFileChange::CvTermAdded { table, term });
            }
        }
        Ok(())
    }

    /// Adds a site under a code not seen before.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when the code is taken.
    pub fn add_site(&mut self, site: Site) -> CoreResult<()> {
        if self.sites.iter().any(|s| s.code() == site.code()) {
            return Err(CoreError::Validation(format!(
                "a site with code '{}' already exists",
                site.code()
            )));
        }
        self.push_pending(DataFileChange::SiteUpdated {
            code: site.code().to_string(),
        });
        self.push_cv_terms(&[
            (CvTableKind::SiteType, site.site_type()),
            (CvTableKind::ElevationDatum, site.elevation_datum()),
        ]);
        self.sites.push(site);
        Ok(())
    }

    /// Updates the mutable fields of a site.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when no site has the code.
    pub fn update_site(&mut self, code: &str, patch: SitePatch) -> CoreResult<()> {
        let index = self
            .sites
            .iter()
            .position(|s| s.code() == code)
            .ok_or_else(|| CoreError::NotFound(format!("no site with code '{code}'")))?;
        apply_site_patch(&mut self.sites[index], patch);
        let site = &self.sites[index];
        let site_type = site.site_type().map(str::to_string);
        let datum = site.elevation_datum().map(str::to_string);
        self.push_pending(DataFileChange::SiteUpdated {
            code: code.to_string(),
        });
        if let Some(term) = site_type {
            self.push_pending(DataFileChange::CvTermAdded {
                table: CvTableKind::SiteType,
                term,
            });
        }
        if let Some(term) = datum {
            self.push_pending(DataFileChange::CvTermAdded {
                table: CvTableKind::ElevationDatum,
                term,
            });
        }
        Ok(())
    }

    /// Adds a variable under a code not seen before.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when the code is taken.
    pub fn add_variable(&mut self, variable: Variable) -> CoreResult<()> {
        if self.variables.iter().any(|v| v.code() == variable.code()) {
            return Err(CoreError::Validation(format!(
                "a variable with code '{}' already exists",
                variable.code()
            )));
        }
        self.push_pending(DataFileChange::VariableUpdated {
            code: variable.code().to_string(),
        });
        self.push_cv_terms(&[
            (CvTableKind::VariableName, Some(variable.name())),
            (CvTableKind::VariableType, variable.variable_type()),
            (CvTableKind::Speciation, variable.speciation()),
        ]);
        self.variables.push(variable);
        Ok(())
    }

    /// Updates the mutable fields of a variable.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when no variable has the code.
    pub fn update_variable(&mut self, code: &str, patch: VariablePatch) -> CoreResult<()> {
        let index = self
            .variables
            .iter()
            .position(|v| v.code() == code)
            .ok_or_else(|| CoreError::NotFound(format!("no variable with code '{code}'")))?;
        apply_variable_patch(&mut self.variables[index], patch);
        let variable = &self.variables[index];
        let name = variable.name().to_string();
        let variable_type = variable.variable_type().map(str::to_string);
        let speciation = variable.speciation().map(str::to_string);
        self.push_pending(DataFileChange::VariableUpdated {
            code: code.to_string(),
        });
        self.push_pending(DataFileChange::CvTermAdded {
            table: CvTableKind::VariableName,
            term: name,
        });
        if let Some(term) = variable_type {
            self.push_pending(DataFileChange::CvTermAdded {
                table: CvTableKind::VariableType,
                term,
            });
        }
        if let Some(term) = speciation {
            self.push_pending(DataFileChange::CvTermAdded {
                table: CvTableKind::Speciation,
                term,
            });
        }
        Ok(())
    }

    /// Adds a method under a code not seen before.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when the code is taken.
    pub fn add_method(&mut self, method: TimeSeriesMethod) -> CoreResult<()> {
        if self.methods.iter().any(|m| m.code() == method.code()) {
            return Err(CoreError::Validation(format!(
                "a method with code '{}' already exists",
                method.code()
            )));
        }
        self.push_pending(DataFileChange::MethodUpdated {
            code: method.code().to_string(),
        });
        self.push_cv_terms(&[(CvTableKind::MethodType, method.method_type())]);
        self.methods.push(method);
        Ok(())
    }

    /// Updates the mutable fields of a method.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when no method has the code.
    pub fn update_method(&mut self, code: &str, patch: MethodPatch) -> CoreResult<()> {
        let index = self
            .methods
            .iter()
            .position(|m| m.code() == code)
            .ok_or_else(|| CoreError::NotFound(format!("no method with code '{code}'")))?;
        apply_method_patch(&mut self.methods[index], patch);
        let method_type = self.methods[index].method_type().map(str::to_string);
        self.push_pending(DataFileChange::MethodUpdated {
            code: code.to_string(),
        });
        if let Some(term) = method_type {
            self.push_pending(DataFileChange::CvTermAdded {
                table: CvTableKind::MethodType,
                term,
            });
        }
        Ok(())
    }

    /// Adds a processing level under a code not seen before.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when the code is taken.
    pub fn add_processing_level(&mut self, level: ProcessingLevel) -> CoreResult<()> {
        if self.processing_levels.iter().any(|l| l.code() == level.code()) {
            return Err(CoreError::Validation(format!(
                "a processing level with code '{}' already exists",
                level.code()
            )));
        }
        self.push_pending(DataFileChange::ProcessingLevelUpdated {
            code: level.code().to_string(),
        });
        self.processing_levels.push(level);
        Ok(())
    }

    /// Updates the mutable fields of a processing level.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when no level has the code.
    pub fn update_processing_level(
        &mut self,
        code: &str,
        patch: ProcessingLevelPatch,
    ) -> CoreResult<()> {
        let index = self
            .processing_levels
            .iter()
            .position(|l| l.code() == code)
            .ok_or_else(|| {
                CoreError::NotFound(format!("no processing level with code '{code}'"))
            })?;
        apply_processing_level_patch(&mut self.processing_levels[index], patch);
        self.push_pending(DataFileChange::ProcessingLevelUpdated {
            code: code.to_string(),
        });
        Ok(())
    }

    fn require_series(&self, series_id: &str) -> CoreResult<()> {
        if self.results.iter().any(|r| r.series_id() == series_id) {
            Ok(())
        } else {
            Err(CoreError::Validation(format!(
                "cannot bind unknown series '{series_id}'"
            )))
        }
    }

    /// Binds a series to one site, releasing it from any other.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for an unknown series and
    /// `CoreError::NotFound` for an unknown site code.
    pub fn bind_series_to_site(&mut self, code: &str, series_id: &str) -> CoreResult<()> {
        self.require_series(series_id)?;
        if !self.sites.iter().any(|s| s.code() == code) {
            return Err(CoreError::NotFound(format!("no site with code '{code}'")));
        }
        for site in &mut self.sites {
            site.series_ids.retain(|id| id != series_id);
            if site.code.as_str() == code {
                site.series_ids.push(series_id.to_string());
            }
        }
        self.push_pending(DataFileChange::SiteUpdated {
            code: code.to_string(),
        });
        Ok(())
    }

    /// Binds a series to one variable, releasing it from any other.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for an unknown series and
    /// `CoreError::NotFound` for an unknown variable code.
    pub fn bind_series_to_variable(&mut self, code: &str, series_id: &str) -> CoreResult<()> {
        self.require_series(series_id)?;
        if !self.variables.iter().any(|v| v.code() == code) {
            return Err(CoreError::NotFound(format!(
                "no variable with code '{code}'"
            )));
        }
        for variable in &mut self.variables {
            variable.series_ids.retain(|id| id != series_id);
            if variable.code.as_str() == code {
                variable.series_ids.push(series_id.to_string());
            }
        }
        self.push_pending(DataFileChange::VariableUpdated {
            code: code.to_string(),
        });
        Ok(())
    }

    /// Binds a series to one method, releasing it from any other.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for an unknown series and
    /// `CoreError::NotFound` for an unknown method code.
    pub fn bind_series_to_method(&mut self, code: &str, series_id: &str) -> CoreResult<()> {
        self.require_series(series_id)?;
        if !self.methods.iter().any(|m| m.code() == code) {
            return Err(CoreError::NotFound(format!("no method with code '{code}'")));
        }
        for method in &mut self.methods {
            method.series_ids.retain(|id| id != series_id);
            if method.code.as_str() == code {
                method.series_ids.push(series_id.to_string());
            }
        }
        self.push_pending(DataFileChange::MethodUpdated {
            code: code.to_string(),
        });
        Ok(())
    }

    /// Binds a series to one processing level, releasing it from any
    /// other.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` for an unknown series and
    /// `CoreError::NotFound` for an unknown level code.
    pub fn bind_series_to_processing_level(
        &mut self,
        code: &str,
        series_id: &str,
    ) -> CoreResult<()> {
        self.require_series(series_id)?;
        if !self.processing_levels.iter().any(|l| l.code() == code) {
            return Err(CoreError::NotFound(format!(
                "no processing level with code '{code}'"
            )));
        }
        for level in &mut self.processing_levels {
            level.series_ids.retain(|id| id != series_id);
            if level.code.as_str() == code {
                level.series_ids.push(series_id.to_string());
            }
        }
        self.push_pending(DataFileChange::ProcessingLevelUpdated {
            code: code.to_string(),
        });
        Ok(())
    }

    pub(crate) fn restore_series_links(
        &mut self,
        site_links: Vec<(String, Vec<String>)>,
        variable_links: Vec<(String, Vec<String>)>,
        method_links: Vec<(String, Vec<String>)>,
        level_links: Vec<(String, Vec<String>)>,
    ) {
        for (code, ids) in site_links {
            if let Some(site) = self.sites.iter_mut().find(|s| s.code() == code) {
                site.series_ids = ids;
            }
        }
        for (code, ids) in variable_links {
            if let Some(variable) = self.variables.iter_mut().find(|v| v.code() == code) {
                variable.series_ids = ids;
            }
        }
        for (code, ids) in method_links {
            if let Some(method) = self.methods.iter_mut().find(|m| m.code() == code) {
                method.series_ids = ids;
            }
        }
        for (code, ids) in level_links {
            if let Some(level) = self.processing_levels.iter_mut().find(|l| l.code() == code) {
                level.series_ids = ids;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> NonEmptyText {
        NonEmptyText::new(value).unwrap()
    }

    fn populated() -> TimeSeriesMetadata {
        let mut metadata = TimeSeriesMetadata::default();
        metadata
            .add_result(TimeSeriesResult::new(text("series-1"), 1440))
            .unwrap();
        metadata
            .add_site(Site::new(text("USU-LBR-Mendon"), text("Logan River at Mendon")))
            .unwrap();
        metadata
            .add_variable(Variable::new(text("ODO"), text("Oxygen, dissolved")))
            .unwrap();
        metadata
            .add_method(TimeSeriesMethod::new(text("QC1"), text("Sensor reading")))
            .unwrap();
        metadata
            .add_processing_level(ProcessingLevel::new(text("1")))
            .unwrap();
        metadata.clear_pending();
        metadata
    }

    #[test]
    fn test_add_rejects_duplicate_codes() {
        let mut metadata = populated();
        assert!(matches!(
            metadata.add_site(Site::new(text("USU-LBR-Mendon"), text("Duplicate"))),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            metadata.add_result(TimeSeriesResult::new(text("series-1"), 1)),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_update_site_records_pending_changes() {
        let mut metadata = populated();
        metadata
            .update_site(
                "USU-LBR-Mendon",
                SitePatch {
                    site_type: Some(text("Stream")),
                    latitude: Some(41.7),
                    ..SitePatch::default()
                },
            )
            .unwrap();
        assert!(metadata.has_pending_changes());
        assert!(metadata.pending_changes().contains(&DataFileChange::SiteUpdated {
            code: "USU-LBR-Mendon".to_string()
        }));
        assert!(metadata.pending_changes().contains(&DataFileChange::CvTermAdded {
            table: CvTableKind::SiteType,
            term: "Stream".to_string()
        }));
        assert_eq!(metadata.sites()[0].latitude(), Some(41.7));
    }

    #[test]
    fn test_update_unknown_code_is_not_found() {
        let mut metadata = populated();
        assert!(matches!(
            metadata.update_site("missing", SitePatch::default()),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_pending_changes_deduplicate() {
        let mut metadata = populated();
        metadata
            .update_method("QC1", MethodPatch::default())
            .unwrap();
        metadata
            .update_method("QC1", MethodPatch::default())
            .unwrap();
        assert_eq!(metadata.pending_changes().len(), 1);
    }

    #[test]
    fn test_binding_moves_a_series_between_sites() {
        let mut metadata = populated();
        metadata
            .add_site(Site::new(text("USU-LBR-Paradise"), text("Logan River at Paradise")))
            .unwrap();
        metadata
            .bind_series_to_site("USU-LBR-Mendon", "series-1")
            .unwrap();
        metadata
            .bind_series_to_site("USU-LBR-Paradise", "series-1")
            .unwrap();
        assert!(metadata.sites()[0].series_ids().is_empty());
        assert_eq!(metadata.sites()[1].series_ids(), ["series-1"]);
    }

    #[test]
    fn test_binding_an_unknown_series_is_rejected() {
        let mut metadata = populated();
        assert!(matches!(
            metadata.bind_series_to_site("USU-LBR-Mendon", "series-9"),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_clear_pending_after_sync() {
        let mut metadata = populated();
        metadata
            .update_processing_level(
                "1",
                ProcessingLevelPatch {
                    definition: Some(text("Quality controlled data")),
                    ..ProcessingLevelPatch::default()
                },
            )
            .unwrap();
        assert!(metadata.has_pending_changes());
        metadata.clear_pending();
        assert!(!metadata.has_pending_changes());
    }

    #[test]
    fn test_result_patch_cannot_touch_value_count() {
        let mut metadata = populated();
        metadata
            .update_result(
                "series-1",
                ResultPatch {
                    sample_medium: Some(text("Surface water")),
                    ..ResultPatch::default()
                },
            )
            .unwrap();
        let result = &metadata.results()[0];
        assert_eq!(result.value_count(), 1440);
        assert_eq!(result.sample_medium(), Some("Surface water"));
    }
}
