//! Building and parsing the sidecar XML documents.
//!
//! Documents are written with a fixed layout so that regenerating an
//! unchanged aggregation produces identical bytes. The parser walks
//! reader events and relies on element names and text content only;
//! attributes are written for RDF consumers but never read back.

use chrono::{DateTime, Utc};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use cdr_types::NonEmptyText;
use cdr_uuid::ResourceId;

use crate::aggregations::timeseries::{
    MethodPatch, ProcessingLevel, ProcessingLevelPatch, ResultPatch, Site, SitePatch,
    TimeSeriesMetadata, TimeSeriesMethod, TimeSeriesResult, Variable, VariablePatch,
};
use crate::aggregations::{Aggregation, AggregationKind, SpatialCoverage, TemporalCoverage};
use crate::constants::{
    CDRTERMS_NAMESPACE, DCTERMS_NAMESPACE, DC_NAMESPACE, ORE_NAMESPACE, RDF_NAMESPACE,
};
use crate::error::{CoreError, CoreResult};
use crate::paths::{content_key, ContentPath};

fn text_element(doc: &mut String, depth: usize, name: &str, value: &str) {
    let pad = "  ".repeat(depth);
    let escaped = escape(value);
    doc.push_str(&format!("{pad}<{name}>{escaped}</{name}>\n"));
}

fn opt_text_element(doc: &mut String, depth: usize, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        text_element(doc, depth, name, value);
    }
}

fn open_tag(doc: &mut String, depth: usize, name: &str) {
    let pad = "  ".repeat(depth);
    doc.push_str(&format!("{pad}<{name}>\n"));
}

fn close_tag(doc: &mut String, depth: usize, name: &str) {
    let pad = "  ".repeat(depth);
    doc.push_str(&format!("{pad}</{name}>\n"));
}

/// Renders the metadata document of one aggregation.
pub(crate) fn build_metadata_document(resource: &ResourceId, aggregation: &Aggregation) -> String {
    let metadata = aggregation.metadata();
    let about = content_key(resource, aggregation.identity().path_str());

    let mut doc = String::new();
    doc.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    doc.push_str(&format!(
        "<rdf:RDF xmlns:rdf=\"{RDF_NAMESPACE}\" xmlns:dc=\"{DC_NAMESPACE}\" \
         xmlns:dcterms=\"{DCTERMS_NAMESPACE}\" xmlns:cdrterms=\"{CDRTERMS_NAMESPACE}\">\n"
    ));
    doc.push_str(&format!(
        "  <rdf:Description rdf:about=\"{}\">\n",
        escape(&about)
    ));

    text_element(&mut doc, 2, "dc:type", aggregation.kind().term());
    opt_text_element(
        &mut doc,
        2,
        "dc:title",
        metadata.title().map(NonEmptyText::as_str),
    );
    for keyword in metadata.keywords() {
        text_element(&mut doc, 2, "dc:subject", keyword.as_str());
    }
    text_element(
        &mut doc,
        2,
        "dcterms:modified",
        &metadata.modified_on().to_rfc3339(),
    );

    if let Some(spatial) = metadata.spatial_coverage() {
        open_tag(&mut doc, 2, "cdrterms:spatialCoverage");
        match *spatial {
            SpatialCoverage::Point { north, east } => {
                open_tag(&mut doc, 3, "cdrterms:point");
                text_element(&mut doc, 4, "cdrterms:north", &north.to_string());
                text_element(&mut doc, 4, "cdrterms:east", &east.to_string());
                close_tag(&mut doc, 3, "cdrterms:point");
            }
            SpatialCoverage::Box {
                northlimit,
                southlimit,
                eastlimit,
                westlimit,
            } => {
                open_tag(&mut doc, 3, "cdrterms:box");
                text_element(&mut doc, 4, "cdrterms:northlimit", &northlimit.to_string());
                text_element(&mut doc, 4, "cdrterms:southlimit", &southlimit.to_string());
                text_element(&mut doc, 4, "cdrterms:eastlimit", &eastlimit.to_string());
                text_element(&mut doc, 4, "cdrterms:westlimit", &westlimit.to_string());
                close_tag(&mut doc, 3, "cdrterms:box");
            }
        }
        close_tag(&mut doc, 2, "cdrterms:spatialCoverage");
    }

    if let Some(temporal) = metadata.temporal_coverage() {
        open_tag(&mut doc, 2, "cdrterms:temporalCoverage");
        text_element(&mut doc, 3, "cdrterms:start", &temporal.start().to_rfc3339());
        text_element(&mut doc, 3, "cdrterms:end", &temporal.end().to_rfc3339());
        close_tag(&mut doc, 2, "cdrterms:temporalCoverage");
    }

    for (key, value) in metadata.extra_metadata() {
        open_tag(&mut doc, 2, "cdrterms:extendedMetadata");
        text_element(&mut doc, 3, "cdrterms:key", key);
        text_element(&mut doc, 3, "cdrterms:value", value);
        close_tag(&mut doc, 2, "cdrterms:extendedMetadata");
    }

    if let Some(series) = metadata.time_series() {
        write_time_series(&mut doc, series);
    }

    doc.push_str("  </rdf:Description>\n");
    doc.push_str("</rdf:RDF>\n");
    doc
}

fn write_time_series(doc: &mut String, series: &TimeSeriesMetadata) {
    for site in series.sites() {
        open_tag(doc, 2, "cdrterms:site");
        text_element(doc, 3, "cdrterms:code", site.code());
        text_element(doc, 3, "cdrterms:name", site.name());
        opt_text_element(doc, 3, "cdrterms:siteType", site.site_type());
        opt_text_element(
            doc,
            3,
            "cdrterms:elevationM",
            site.elevation_m().map(|v| v.to_string()).as_deref(),
        );
        opt_text_element(doc, 3, "cdrterms:elevationDatum", site.elevation_datum());
        opt_text_element(
            doc,
            3,
            "cdrterms:latitude",
            site.latitude().map(|v| v.to_string()).as_deref(),
        );
        opt_text_element(
            doc,
            3,
            "cdrterms:longitude",
            site.longitude().map(|v| v.to_string()).as_deref(),
        );
        for series_id in site.series_ids() {
            text_element(doc, 3, "cdrterms:seriesId", series_id);
        }
        close_tag(doc, 2, "cdrterms:site");
    }

    for variable in series.variables() {
        open_tag(doc, 2, "cdrterms:variable");
        text_element(doc, 3, "cdrterms:code", variable.code());
        text_element(doc, 3, "cdrterms:name", variable.name());
        opt_text_element(doc, 3, "cdrterms:variableType", variable.variable_type());
        opt_text_element(
            doc,
            3,
            "cdrterms:noDataValue",
            variable.no_data_value().map(|v| v.to_string()).as_deref(),
        );
        opt_text_element(doc, 3, "cdrterms:definition", variable.definition());
        opt_text_element(doc, 3, "cdrterms:speciation", variable.speciation());
        for series_id in variable.series_ids() {
            text_element(doc, 3, "cdrterms:seriesId", series_id);
        }
        close_tag(doc, 2, "cdrterms:variable");
    }

    for method in series.methods() {
        open_tag(doc, 2, "cdrterms:method");
        text_element(doc, 3, "cdrterms:code", method.code());
        text_element(doc, 3, "cdrterms:name", method.name());
        opt_text_element(doc, 3, "cdrterms:methodType", method.method_type());
        opt_text_element(doc, 3, "cdrterms:description", method.description());
        opt_text_element(doc, 3, "cdrterms:link", method.link());
        for series_id in method.series_ids() {
            text_element(doc, 3, "cdrterms:seriesId", series_id);
        }
        close_tag(doc, 2, "cdrterms:method");
    }

    for level in series.processing_levels() {
        open_tag(doc, 2, "cdrterms:processingLevel");
        text_element(doc, 3, "cdrterms:code", level.code());
        opt_text_element(doc, 3, "cdrterms:definition", level.definition());
        opt_text_element(doc, 3, "cdrterms:explanation", level.explanation());
        for series_id in level.series_ids() {
            text_element(doc, 3, "cdrterms:seriesId", series_id);
        }
        close_tag(doc, 2, "cdrterms:processingLevel");
    }

    for result in series.results() {
        open_tag(doc, 2, "cdrterms:result");
        text_element(doc, 3, "cdrterms:seriesId", result.series_id());
        text_element(doc, 3, "cdrterms:valueCount", &result.value_count().to_string());
        opt_text_element(doc, 3, "cdrterms:unitsType", result.units_type());
        opt_text_element(doc, 3, "cdrterms:unitsName", result.units_name());
        opt_text_element(
            doc,
            3,
            "cdrterms:unitsAbbreviation",
            result.units_abbreviation(),
        );
        opt_text_element(doc, 3, "cdrterms:status", result.status());
        opt_text_element(doc, 3, "cdrterms:sampleMedium", result.sample_medium());
        opt_text_element(
            doc,
            3,
            "cdrterms:aggregationStatistic",
            result.aggregation_statistic(),
        );
        opt_text_element(doc, 3, "cdrterms:seriesLabel", result.series_label());
        close_tag(doc, 2, "cdrterms:result");
    }
}

/// Renders the resource map document of one aggregation.
pub(crate) fn build_map_document(
    resource: &ResourceId,
    aggregation: &Aggregation,
    members: &[&ContentPath],
) -> String {
    let documents = aggregation.documents();
    let about = content_key(resource, documents.map_path());
    let identity_key = content_key(resource, aggregation.identity().path_str());
    let metadata_key = content_key(resource, documents.metadata_path());

    let mut doc = String::new();
    doc.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    doc.push_str(&format!(
        "<rdf:RDF xmlns:rdf=\"{RDF_NAMESPACE}\" xmlns:dc=\"{DC_NAMESPACE}\" \
         xmlns:dcterms=\"{DCTERMS_NAMESPACE}\" xmlns:ore=\"{ORE_NAMESPACE}\">\n"
    ));
    doc.push_str(&format!(
        "  <rdf:Description rdf:about=\"{}\">\n",
        escape(&about)
    ));
    text_element(
        &mut doc,
        2,
        "dc:title",
        &format!("Resource map for {}", aggregation.identity()),
    );
    text_element(
        &mut doc,
        2,
        "dcterms:modified",
        &aggregation.metadata().modified_on().to_rfc3339(),
    );
    open_tag(&mut doc, 2, "ore:describes");
    doc.push_str(&format!(
        "      <ore:Aggregation rdf:about=\"{}\">\n",
        escape(&identity_key)
    ));
    text_element(&mut doc, 4, "dc:type", aggregation.kind().term());
    doc.push_str(&format!(
        "        <ore:isDescribedBy rdf:resource=\"{}\"/>\n",
        escape(&metadata_key)
    ));
    for member in members {
        doc.push_str(&format!(
            "        <ore:aggregates rdf:resource=\"{}\"/>\n",
            escape(&content_key(resource, member.as_str()))
        ));
    }
    close_tag(&mut doc, 3, "ore:Aggregation");
    close_tag(&mut doc, 2, "ore:describes");
    doc.push_str("  </rdf:Description>\n");
    doc.push_str("</rdf:RDF>\n");
    doc
}

/// What a metadata document parses back into.
#[derive(Debug)]
pub(crate) struct RestoredAggregation {
    pub kind: AggregationKind,
    pub title: Option<NonEmptyText>,
    pub keywords: Vec<NonEmptyText>,
    pub modified: Option<DateTime<Utc>>,
    pub spatial: Option<SpatialCoverage>,
    pub temporal: Option<TemporalCoverage>,
    pub extra: Vec<(String, String)>,
    pub time_series: Option<TimeSeriesMetadata>,
}

#[derive(Debug, Default)]
struct FieldBag {
    values: Vec<(String, String)>,
}

impl FieldBag {
    fn push(&mut self, name: &str, value: String) {
        self.values.push((name.to_string(), value));
    }

    fn first(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn all(&self, name: &str) -> Vec<String> {
        self.values
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn required(&self, container: &str, name: &str) -> CoreResult<NonEmptyText> {
        let value = self.first(name).ok_or_else(|| {
            CoreError::DocumentParse(format!("{container} is missing <{name}>"))
        })?;
        NonEmptyText::new(value)
            .map_err(|e| CoreError::DocumentParse(format!("{container} has invalid <{name}>: {e}")))
    }

    fn optional(&self, container: &str, name: &str) -> CoreResult<Option<NonEmptyText>> {
        match self.first(name) {
            None => Ok(None),
            Some(value) => NonEmptyText::new(value).map(Some).map_err(|e| {
                CoreError::DocumentParse(format!("{container} has invalid <{name}>: {e}"))
            }),
        }
    }

    fn optional_number(&self, container: &str, name: &str) -> CoreResult<Option<f64>> {
        match self.first(name) {
            None => Ok(None),
            Some(value) => value.parse::<f64>().map(Some).map_err(|_| {
                CoreError::DocumentParse(format!(
                    "{container} has a non-numeric <{name}>: '{value}'"
                ))
            }),
        }
    }

    fn required_number(&self, container: &str, name: &str) -> CoreResult<f64> {
        self.optional_number(container, name)?.ok_or_else(|| {
            CoreError::DocumentParse(format!("{container} is missing <{name}>"))
        })
    }
}

fn local_name(raw: &[u8]) -> String {
    let full = String::from_utf8_lossy(raw);
    match full.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => full.to_string(),
    }
}

fn parse_instant(value: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|e| CoreError::DocumentParse(format!("invalid timestamp '{value}': {e}")))
}

const ELEMENT_CONTAINERS: &[&str] = &["site", "variable", "method", "processingLevel", "result"];
const BAG_CONTAINERS: &[&str] = &[
    "site",
    "variable",
    "method",
    "processingLevel",
    "result",
    "point",
    "box",
    "temporalCoverage",
    "extendedMetadata",
];

/// Parses a metadata document back into aggregation state.
///
/// # Errors
///
/// Returns `CoreError::DocumentParse` for malformed XML, a missing or
/// unknown aggregation type, or invalid element fields.
pub(crate) fn parse_metadata_document(xml: &str) -> CoreResult<RestoredAggregation> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut bag = FieldBag::default();

    let mut kind_term: Option<String> = None;
    let mut title: Option<NonEmptyText> = None;
    let mut keywords: Vec<NonEmptyText> = Vec::new();
    let mut modified: Option<DateTime<Utc>> = None;
    let mut spatial: Option<SpatialCoverage> = None;
    let mut temporal: Option<TemporalCoverage> = None;
    let mut extra: Vec<(String, String)> = Vec::new();
    let mut time_series: Option<TimeSeriesMetadata> = None;
    let mut site_links: Vec<(String, Vec<String>)> = Vec::new();
    let mut variable_links: Vec<(String, Vec<String>)> = Vec::new();
    let mut method_links: Vec<(String, Vec<String>)> = Vec::new();
    let mut level_links: Vec<(String, Vec<String>)> = Vec::new();

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = local_name(e.name().as_ref());
                if BAG_CONTAINERS.contains(&name.as_str()) {
                    bag = FieldBag::default();
                }
                stack.push(name);
            }
            Ok(Event::Text(ref t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| CoreError::DocumentParse(e.to_string()))?
                    .to_string();
                if let Some(field) = stack.last().cloned() {
                    let parent = if stack.len() >= 2 {
                        stack[stack.len() - 2].as_str()
                    } else {
                        ""
                    };
                    match parent {
                        "Description" => match field.as_str() {
                            "type" => kind_term = Some(text),
                            "title" => {
                                title = Some(NonEmptyText::new(&text).map_err(|e| {
                                    CoreError::DocumentParse(format!("invalid <dc:title>: {e}"))
                                })?);
                            }
                            "subject" => {
                                keywords.push(NonEmptyText::new(&text).map_err(|e| {
                                    CoreError::DocumentParse(format!("invalid <dc:subject>: {e}"))
                                })?);
                            }
                            "modified" => modified = Some(parse_instant(&text)?),
                            _ => {}
                        },
                        parent if BAG_CONTAINERS.contains(&parent) => bag.push(&field, text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let name = local_name(e.name().as_ref());
                stack.pop();
                if ELEMENT_CONTAINERS.contains(&name.as_str()) {
                    let series = time_series.get_or_insert_with(TimeSeriesMetadata::default);
                    match name.as_str() {
                        "site" => finish_site(&bag, series, &mut site_links)?,
                        "variable" => finish_variable(&bag, series, &mut variable_links)?,
                        "method" => finish_method(&bag, series, &mut method_links)?,
                        "processingLevel" => finish_level(&bag, series, &mut level_links)?,
                        "result" => finish_result(&bag, series)?,
                        _ => {}
                    }
                } else {
                    match name.as_str() {
                        "point" => {
                            spatial = Some(SpatialCoverage::Point {
                                north: bag.required_number("point coverage", "north")?,
                                east: bag.required_number("point coverage", "east")?,
                            });
                        }
                        "box" => {
                            spatial = Some(SpatialCoverage::Box {
                                northlimit: bag.required_number("box coverage", "northlimit")?,
                                southlimit: bag.required_number("box coverage", "southlimit")?,
                                eastlimit: bag.required_number("box coverage", "eastlimit")?,
                                westlimit: bag.required_number("box coverage", "westlimit")?,
                            });
                        }
                        "temporalCoverage" => {
                            let start = bag.first("start").ok_or_else(|| {
                                CoreError::DocumentParse(
                                    "temporal coverage is missing <start>".to_string(),
                                )
                            })?;
                            let end = bag.first("end").ok_or_else(|| {
                                CoreError::DocumentParse(
                                    "temporal coverage is missing <end>".to_string(),
                                )
                            })?;
                            temporal =
                                Some(TemporalCoverage::new(
                                    parse_instant(start)?,
                                    parse_instant(end)?,
                                )?);
                        }
                        "extendedMetadata" => {
                            let key = bag.first("key").ok_or_else(|| {
                                CoreError::DocumentParse(
                                    "extended metadata is missing <key>".to_string(),
                                )
                            })?;
                            let value = bag.first("value").unwrap_or_default();
                            extra.push((key.to_string(), value.to_string()));
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(CoreError::DocumentParse(e.to_string())),
        }
        buf.clear();
    }

    let term = kind_term
        .ok_or_else(|| CoreError::DocumentParse("document has no aggregation type".to_string()))?;
    let kind = AggregationKind::parse_term(&term)
        .ok_or_else(|| CoreError::DocumentParse(format!("unknown aggregation type '{term}'")))?;

    if let Some(series) = time_series.as_mut() {
        series.restore_series_links(site_links, variable_links, method_links, level_links);
        series.clear_pending();
    }

    Ok(RestoredAggregation {
        kind,
        title,
        keywords,
        modified,
        spatial,
        temporal,
        extra,
        time_series,
    })
}

fn finish_site(
    bag: &FieldBag,
    series: &mut TimeSeriesMetadata,
    links: &mut Vec<(String, Vec<String>)>,
) -> CoreResult<()> {
    let code = bag.required("site", "code")?;
    let name = bag.required("site", "name")?;
    let site = Site::new(code.clone(), name).with(SitePatch {
        name: None,
        site_type: bag.optional("site", "siteType")?,
        elevation_m: bag.optional_number("site", "elevationM")?,
        elevation_datum: bag.optional("site", "elevationDatum")?,
        latitude: bag.optional_number("site", "latitude")?,
        longitude: bag.optional_number("site", "longitude")?,
    });
    series
        .add_site(site)
        .map_err(|e| CoreError::DocumentParse(format!("invalid site list: {e}")))?;
    links.push((code.as_str().to_string(), bag.all("seriesId")));
    Ok(())
}

fn finish_variable(
    bag: &FieldBag,
    series: &mut TimeSeriesMetadata,
    links: &mut Vec<(String, Vec<String>)>,
) -> CoreResult<()> {
    let code = bag.required("variable", "code")?;
    let name = bag.required("variable", "name")?;
    let variable = Variable::new(code.clone(), name).with(VariablePatch {
        name: None,
        variable_type: bag.optional("variable", "variableType")?,
        no_data_value: bag.optional_number("variable", "noDataValue")?,
        definition: bag.optional("variable", "definition")?,
        speciation: bag.optional("variable", "speciation")?,
    });
    series
        .add_variable(variable)
        .map_err(|e| CoreError::DocumentParse(format!("invalid variable list: {e}")))?;
    links.push((code.as_str().to_string(), bag.all("seriesId")));
    Ok(())
}

fn finish_method(
    bag: &FieldBag,
    series: &mut TimeSeriesMetadata,
    links: &mut Vec<(String, Vec<String>)>,
) -> CoreResult<()> {
    let code = bag.required("method", "code")?;
    let name = bag.required("method", "name")?;
    let method = TimeSeriesMethod::new(code.clone(), name).with(MethodPatch {
        name: None,
        method_type: bag.optional("method", "methodType")?,
        description: bag.optional("method", "description")?,
        link: bag.optional("method", "link")?,
    });
    series
        .add_method(method)
        .map_err(|e| CoreError::DocumentParse(format!("invalid method list: {e}")))?;
    links.push((code.as_str().to_string(), bag.all("seriesId")));
    Ok(())
}

fn finish_level(
    bag: &FieldBag,
    series: &mut TimeSeriesMetadata,
    links: &mut Vec<(String, Vec<String>)>,
) -> CoreResult<()> {
    let code = bag.required("processing level", "code")?;
    let level = ProcessingLevel::new(code.clone()).with(ProcessingLevelPatch {
        definition: bag.optional("processing level", "definition")?,
        explanation: bag.optional("processing level", "explanation")?,
    });
    series
        .add_processing_level(level)
        .map_err(|e| CoreError::DocumentParse(format!("invalid processing level list: {e}")))?;
    links.push((code.as_str().to_string(), bag.all("seriesId")));
    Ok(())
}

fn finish_result(bag: &FieldBag, series: &mut TimeSeriesMetadata) -> CoreResult<()> {
    let series_id = bag.required("result", "seriesId")?;
    let value_count = bag.required_number("result", "valueCount")? as u64;
    let result = TimeSeriesResult::new(series_id, value_count).with(ResultPatch {
        units_type: bag.optional("result", "unitsType")?,
        units_name: bag.optional("result", "unitsName")?,
        units_abbreviation: bag.optional("result", "unitsAbbreviation")?,
        status: bag.optional("result", "status")?,
        sample_medium: bag.optional("result", "sampleMedium")?,
        aggregation_statistic: bag.optional("result", "aggregationStatistic")?,
        series_label: bag.optional("result", "seriesLabel")?,
    });
    series
        .add_result(result)
        .map_err(|e| CoreError::DocumentParse(format!("invalid result list: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregations::timeseries::{ProcessingLevelPatch, ResultPatch, SitePatch};
    use crate::aggregations::{AggregationMetadata, AggregationRegistry};
    use crate::paths::{AggregationIdentity, FolderPath};
    use chrono::TimeZone;

    fn text(value: &str) -> NonEmptyText {
        NonEmptyText::new(value).unwrap()
    }

    fn instant(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    fn registry_with(kind: AggregationKind, identity: AggregationIdentity) -> (AggregationRegistry, u64) {
        let mut registry = AggregationRegistry::new();
        let id = registry
            .create(kind, identity, AggregationMetadata::new(kind))
            .unwrap();
        (registry, id)
    }

    #[test]
    fn test_common_metadata_round_trip() {
        let identity = AggregationIdentity::Folder(FolderPath::parse("raster").unwrap());
        let (mut registry, id) = registry_with(AggregationKind::GeoRaster, identity);
        let resource = ResourceId::generate();

        {
            let metadata = registry.get_mut(id).unwrap().metadata_mut();
            metadata.set_title(Some(text("Logan <River> & Co")));
            metadata.add_keyword(text("hydrology"));
            metadata.add_keyword(text("raster"));
            metadata.set_spatial_coverage(Some(SpatialCoverage::Point {
                north: 41.7,
                east: -111.8,
            }));
            metadata.set_temporal_coverage(Some(
                TemporalCoverage::new(instant(2023, 1, 1), instant(2024, 1, 1)).unwrap(),
            ));
            metadata.set_extra_value("station".to_string(), "USU-LBR-Mendon".to_string());
        }

        let doc = build_metadata_document(&resource, registry.get(id).unwrap());
        let restored = parse_metadata_document(&doc).unwrap();

        assert_eq!(restored.kind, AggregationKind::GeoRaster);
        assert_eq!(restored.title.unwrap().as_str(), "Logan <River> & Co");
        assert_eq!(restored.keywords.len(), 2);
        assert_eq!(
            restored.spatial,
            Some(SpatialCoverage::Point {
                north: 41.7,
                east: -111.8,
            })
        );
        let temporal = restored.temporal.unwrap();
        assert_eq!(temporal.start(), instant(2023, 1, 1));
        assert_eq!(temporal.end(), instant(2024, 1, 1));
        assert_eq!(
            restored.extra,
            vec![("station".to_string(), "USU-LBR-Mendon".to_string())]
        );
        assert!(restored.modified.is_some());
        assert!(restored.time_series.is_none());
    }

    #[test]
    fn test_time_series_round_trip_restores_links_without_pending_changes() {
        let identity =
            AggregationIdentity::File(ContentPath::parse("obs/logan.sqlite").unwrap());
        let (mut registry, id) = registry_with(AggregationKind::TimeSeries, identity);
        let resource = ResourceId::generate();

        {
            let metadata = registry.get_mut(id).unwrap().metadata_mut();
            let series = metadata.time_series_mut().unwrap();
            series
                .add_result(
                    TimeSeriesResult::new(text("series-1"), 1440).with(ResultPatch {
                        sample_medium: Some(text("Surface water")),
                        ..ResultPatch::default()
                    }),
                )
                .unwrap();
            series
                .add_site(
                    Site::new(text("USU-LBR-Mendon"), text("Logan River at Mendon")).with(
                        SitePatch {
                            latitude: Some(41.7),
                            ..SitePatch::default()
                        },
                    ),
                )
                .unwrap();
            series
                .add_processing_level(ProcessingLevel::new(text("1")).with(
                    ProcessingLevelPatch {
                        definition: Some(text("Quality controlled data")),
                        ..ProcessingLevelPatch::default()
                    },
                ))
                .unwrap();
            series.bind_series_to_site("USU-LBR-Mendon", "series-1").unwrap();
            series
                .bind_series_to_processing_level("1", "series-1")
                .unwrap();
        }

        let doc = build_metadata_document(&resource, registry.get(id).unwrap());
        let restored = parse_metadata_document(&doc).unwrap();

        assert_eq!(restored.kind, AggregationKind::TimeSeries);
        let series = restored.time_series.unwrap();
        assert_eq!(series.sites().len(), 1);
        assert_eq!(series.sites()[0].series_ids(), ["series-1"]);
        assert_eq!(series.sites()[0].latitude(), Some(41.7));
        assert_eq!(series.processing_levels()[0].series_ids(), ["series-1"]);
        assert_eq!(series.results()[0].value_count(), 1440);
        assert_eq!(series.results()[0].sample_medium(), Some("Surface water"));
        assert!(!series.has_pending_changes());
    }

    #[test]
    fn test_regeneration_is_deterministic() {
        let identity = AggregationIdentity::Folder(FolderPath::parse("raster").unwrap());
        let (registry, id) = registry_with(AggregationKind::GeoRaster, identity);
        let resource = ResourceId::generate();
        let first = build_metadata_document(&resource, registry.get(id).unwrap());
        let second = build_metadata_document(&resource, registry.get(id).unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn test_map_document_lists_members() {
        let identity = AggregationIdentity::Folder(FolderPath::parse("raster").unwrap());
        let (registry, id) = registry_with(AggregationKind::GeoRaster, identity);
        let resource = ResourceId::generate();
        let cell = ContentPath::parse("raster/cell.tif").unwrap();
        let header = ContentPath::parse("raster/cell.hdr").unwrap();

        let doc = build_map_document(&resource, registry.get(id).unwrap(), &[&cell, &header]);

        assert!(doc.contains("GeoRasterAggregation"));
        assert!(doc.contains(&format!(
            "{}/data/contents/raster/cell.tif",
            resource.as_simple()
        )));
        assert!(doc.contains(&format!(
            "{}/data/contents/raster/raster_meta.xml",
            resource.as_simple()
        )));
    }

    #[test]
    fn test_parse_rejects_a_document_without_a_type() {
        let doc = "<?xml version=\"1.0\"?>\n<rdf:RDF xmlns:rdf=\"x\">\n  \
                   <rdf:Description>\n    <dc:title>No type</dc:title>\n  \
                   </rdf:Description>\n</rdf:RDF>\n";
        assert!(matches!(
            parse_metadata_document(doc),
            Err(CoreError::DocumentParse(_))
        ));
    }

    #[test]
    fn test_parse_rejects_an_unknown_type_term() {
        let doc = "<?xml version=\"1.0\"?>\n<rdf:RDF xmlns:rdf=\"x\">\n  \
                   <rdf:Description>\n    <dc:type>MysteryAggregation</dc:type>\n  \
                   </rdf:Description>\n</rdf:RDF>\n";
        assert!(matches!(
            parse_metadata_document(doc),
            Err(CoreError::DocumentParse(_))
        ));
    }

    #[test]
    fn test_parse_rejects_malformed_xml() {
        let doc = "<rdf:RDF><rdf:Description><dc:title>x</dc:title>";
        assert!(matches!(
            parse_metadata_document(doc),
            Err(CoreError::DocumentParse(_))
        ));
    }
}
