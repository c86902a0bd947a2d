use std::{env, fs, path::PathBuf};

use ts_rs::TS;

fn generate_types_content() -> String {
    let decls = [
        utils::response::ApiResponse::<()>::decl(),
        db::models::invoice::InvoiceStatus::decl(),
        db::models::invoice::Invoice::decl(),
        db::models::invoice::InvoiceItem::decl(),
        db::models::invoice::InvoiceWithItems::decl(),
        db::models::audit_log::AuditAction::decl(),
        db::models::audit_log::AuditLog::decl(),
        db::models::ab_testing::ExperimentStatus::decl(),
        db::models::ab_testing::AbEventType::decl(),
        db::models::ab_testing::DeviceType::decl(),
        db::models::ab_testing::AbConfig::decl(),
        db::models::ab_testing::AbExperiment::decl(),
        db::models::ab_testing::AbVariant::decl(),
        db::models::ab_testing::AbEvent::decl(),
        db::models::ab_testing::AbExperimentWithVariants::decl(),
        db::models::ab_testing::VariantContent::decl(),
        services::services::invoice::InvoiceItemInput::decl(),
        services::services::invoice::CreateInvoice::decl(),
        services::services::invoice::UpdateInvoice::decl(),
        services::services::invoice::UpdateInvoiceStatus::decl(),
        services::services::invoice::StatusChange::decl(),
        services::services::invoice::IntegrityReport::decl(),
        services::services::invoice::ListInvoicesQuery::decl(),
        services::services::invoice::Pagination::decl(),
        services::services::invoice::InvoicePage::decl(),
        services::services::ab_testing::AssignedVariant::decl(),
        services::services::ab_testing::VariantAssignment::decl(),
        services::services::ab_testing::RecordEvent::decl(),
        services::services::ab_testing::CreateExperiment::decl(),
        services::services::ab_testing::UpdateExperimentStatus::decl(),
        services::services::ab_testing::ListExperimentsQuery::decl(),
        services::services::ab_testing::ExperimentList::decl(),
        services::services::ab_testing::UpdateAbConfig::decl(),
    ];

    let body = decls
        .into_iter()
        .map(|decl| format!("export {}", decl.trim_start_matches("export ")))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!("// This file was generated by `generate-types`. Do not edit it by hand.\n\n{body}\n")
}

/// Prints the declarations, or writes them to the path given as first argument.
fn main() -> std::io::Result<()> {
    let content = generate_types_content();
    match env::args().nth(1).map(PathBuf::from) {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, content)?;
            eprintln!("Wrote TypeScript types to {}", path.display());
        }
        None => print!("{content}"),
    }
    Ok(())
}
