use crate::Result;
use crate::config::CertificateFiles;
use crate::error::Error;

pub(crate) fn tls_config_error(message: impl Into<String>) -> Error {
    Error::TlsConfig {
        message: message.into(),
    }
}

fn parse_pem_certificates(
    pem_bundle: &[u8],
    context: &str,
) -> Result<Vec<ureq::tls::Certificate<'static>>> {
    let mut certificates = Vec::new();
    for item in ureq::tls::parse_pem(pem_bundle) {
        let item = item.map_err(|source| {
            tls_config_error(format!("failed to parse PEM {context}: {source}"))
        })?;
        if let ureq::tls::PemItem::Certificate(certificate) = item {
            certificates.push(certificate);
        }
    }
    if certificates.is_empty() {
        return Err(tls_config_error(format!(
            "no certificate blocks found in PEM {context}"
        )));
    }
    Ok(certificates)
}

fn read_pem_file(path: &std::path::Path, context: &str) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| {
        tls_config_error(format!(
            "failed to read {context} {}: {source}",
            path.display()
        ))
    })
}

pub(crate) fn build_tls_config(
    client_identity: Option<&CertificateFiles>,
) -> Result<ureq::tls::TlsConfig> {
    let mut tls_config_builder =
        ureq::tls::TlsConfig::builder().provider(ureq::tls::TlsProvider::Rustls);

    if let Some(files) = client_identity {
        let cert_chain_pem = read_pem_file(&files.cert_file, "client certificate")?;
        let private_key_pem = read_pem_file(&files.key_file, "client private key")?;
        let cert_chain = parse_pem_certificates(&cert_chain_pem, "client certificate chain")?;
        let private_key = ureq::tls::PrivateKey::from_pem(&private_key_pem).map_err(|source| {
            tls_config_error(format!("failed to parse client private key PEM: {source}"))
        })?;
        let client_cert = ureq::tls::ClientCert::new_with_certs(&cert_chain, private_key);
        tls_config_builder = tls_config_builder.client_cert(Some(client_cert));
    }

    Ok(tls_config_builder.build())
}
