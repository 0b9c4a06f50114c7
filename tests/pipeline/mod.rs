mod consumer;
