/*!
# Beacon DevKit - Stubs et utilitaires de test

Bibliothèque pour tester le kernel sans gateways ni InfluxDB réels :
- Gateway simulé (client TCP qui émet des lignes de rapport)
- Sinks d'enregistrement et en échec
- Harness qui démarre le pipeline complet sur un port éphémère
*/

pub mod gateway_stub;
pub mod sink_stub;
pub mod test_utils;

pub use gateway_stub::{report_line, GatewayStub};
pub use sink_stub::{FailingSink, RecordingSink};
pub use test_utils::TestHarness;
